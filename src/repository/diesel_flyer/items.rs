//! Extracted item storage.

use chrono::Utc;
use diesel::prelude::*;

use super::DieselFlyerRepository;
use crate::models::{FlyerItem, NewFlyerItem};
use crate::repository::diesel_models::{FlyerItemRecord, LastInsertRowId, NewFlyerItemRow};
use crate::repository::diesel_pool::{run_blocking, DieselError};
use crate::repository::{format_date, parse_date_opt, parse_datetime};
use crate::schema::flyer_items;

impl From<FlyerItemRecord> for FlyerItem {
    fn from(r: FlyerItemRecord) -> Self {
        FlyerItem {
            id: r.id,
            flyer_id: r.flyer_id,
            flyer_page_id: r.flyer_page_id,
            name: r.name,
            price: r.price,
            original_price: r.original_price,
            quantity: r.quantity,
            start_date: parse_date_opt(r.start_date),
            end_date: parse_date_opt(r.end_date),
            shop_name: r.shop_name,
            categories: r.categories,
            keywords: r.keywords,
            photo_url: r.photo_url,
            local_photo_path: r.local_photo_path,
            created_at: parse_datetime(&r.created_at),
        }
    }
}

impl DieselFlyerRepository {
    /// Insert one extracted item. Items are never merged with earlier rows.
    pub async fn insert_item(&self, item: &NewFlyerItem) -> Result<i64, DieselError> {
        let now = Utc::now().to_rfc3339();
        let item = item.clone();
        let start = item.start_date.map(format_date);
        let end = item.end_date.map(format_date);

        run_blocking(self.pool.clone(), move |conn| {
            diesel::insert_into(flyer_items::table)
                .values(NewFlyerItemRow {
                    flyer_id: item.flyer_id,
                    flyer_page_id: item.flyer_page_id,
                    name: &item.name,
                    price: item.price,
                    original_price: item.original_price,
                    quantity: &item.quantity,
                    start_date: start.as_deref(),
                    end_date: end.as_deref(),
                    shop_name: &item.shop_name,
                    categories: &item.categories,
                    keywords: &item.keywords,
                    photo_url: item.photo_url.as_deref(),
                    local_photo_path: item.local_photo_path.as_deref(),
                    created_at: &now,
                })
                .execute(conn)?;
            diesel::sql_query("SELECT last_insert_rowid()")
                .get_result::<LastInsertRowId>(conn)
                .map(|r| r.id)
        })
        .await
    }

    /// Items of a flyer in insertion order.
    pub async fn get_items(&self, flyer_id: i64) -> Result<Vec<FlyerItem>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            flyer_items::table
                .filter(flyer_items::flyer_id.eq(flyer_id))
                .order(flyer_items::id.asc())
                .load::<FlyerItemRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(FlyerItem::from).collect())
    }

    /// Count all stored items.
    pub async fn count_items(&self) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = flyer_items::table.select(count_star()).first(conn)?;
            Ok(count as u64)
        })
        .await
    }
}
