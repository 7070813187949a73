//! Domain models for flyers, their pages, and extracted items.

mod flyer;
mod item;
mod page;

pub use flyer::{parse_flyer_date, Flyer, ValidityWindow, FLYER_DATE_FORMAT};
pub use item::{FlyerItem, NewFlyerItem};
pub use page::{FlyerPage, PageStatus, MAX_PAGE_RETRIES};
