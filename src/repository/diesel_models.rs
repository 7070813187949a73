//! Diesel ORM models for database tables.
//!
//! Records mirror table rows exactly (dates as text); conversion to domain
//! models happens in the repositories.

use diesel::prelude::*;

use crate::schema;

/// Flyer record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::flyers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FlyerRecord {
    pub id: i64,
    pub shop_name: String,
    pub url: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub parsed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New flyer for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::flyers)]
pub struct NewFlyer<'a> {
    pub shop_name: &'a str,
    pub url: &'a str,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub parsed_at: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Flyer page record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::flyer_pages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FlyerPageRecord {
    pub id: i64,
    pub flyer_id: i64,
    pub page_number: i32,
    pub source_url: Option<String>,
    pub local_path: String,
    pub status: String,
    pub retries: i32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New flyer page for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::flyer_pages)]
pub struct NewFlyerPage<'a> {
    pub flyer_id: i64,
    pub page_number: i32,
    pub source_url: Option<&'a str>,
    pub local_path: &'a str,
    pub status: &'a str,
    pub retries: i32,
    pub last_error: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Flyer item record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::flyer_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FlyerItemRecord {
    pub id: i64,
    pub flyer_id: i64,
    pub flyer_page_id: Option<i64>,
    pub name: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub quantity: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub shop_name: String,
    pub categories: String,
    pub keywords: String,
    pub photo_url: Option<String>,
    pub local_photo_path: Option<String>,
    pub created_at: String,
}

/// New flyer item for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::flyer_items)]
pub struct NewFlyerItemRow<'a> {
    pub flyer_id: i64,
    pub flyer_page_id: Option<i64>,
    pub name: &'a str,
    pub price: f64,
    pub original_price: Option<f64>,
    pub quantity: &'a str,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub shop_name: &'a str,
    pub categories: &'a str,
    pub keywords: &'a str,
    pub photo_url: Option<&'a str>,
    pub local_photo_path: Option<&'a str>,
    pub created_at: &'a str,
}

/// Job status record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::job_status)]
#[diesel(primary_key(name))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobStatusRecord {
    pub name: String,
    pub last_run: String,
    pub updated_at: String,
}

/// Row id returned by `SELECT last_insert_rowid()`.
#[derive(QueryableByName, Debug)]
pub struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt, column_name = "last_insert_rowid()")]
    pub id: i64,
}
