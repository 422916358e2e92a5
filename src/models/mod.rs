pub mod page;

pub use page::{Entity as Page, Model as PageRecord, PageStatus};
