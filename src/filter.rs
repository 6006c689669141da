use sea_orm::Order;
use serde::Serialize;

use crate::validator::{self, Validator};

pub const MOVIE_SORT_SAFELIST: &[&str] =
    &["id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime"];

const MAX_PAGE: i64 = 10_000_000;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone, Debug)]
pub struct Filter {
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl Default for Filter {
    fn default() -> Self {
        Self { page: 1, page_size: 20, sort: "id".to_string(), sort_safelist: MOVIE_SORT_SAFELIST }
    }
}

impl Filter {
    pub fn validate(&self, v: &mut Validator) {
        v.check(self.page > 0, "page", "must be greater than zero");
        v.check(self.page <= MAX_PAGE, "page", "must be a maximum of 10 million");
        v.check(self.page_size > 0, "page_size", "must be greater than zero");
        v.check(self.page_size <= MAX_PAGE_SIZE, "page_size", "must be a maximum of 100");
        if !validator::permitted_value(self.sort.as_str(), self.sort_safelist) {
            v.add_error("sort", &format!("invalid sort value {:?}", self.sort));
        }
    }

    /// Column named by the sort value, or `None` if the value is not allow-listed.
    pub fn sort_column(&self) -> Option<&str> {
        self.sort_safelist
            .iter()
            .any(|safe| *safe == self.sort)
            .then(|| self.sort.trim_start_matches('-'))
    }

    pub fn sort_direction(&self) -> Order {
        if self.sort.starts_with('-') { Order::Desc } else { Order::Asc }
    }

    pub fn limit(&self) -> u64 {
        self.page_size.max(0) as u64
    }

    pub fn offset(&self) -> u64 {
        ((self.page - 1).max(0) * self.page_size.max(0)) as u64
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Metadata {
    pub current_page: i64,
    pub page_size: i64,
    pub first_page: i64,
    pub last_page: i64,
    pub total_records: i64,
}

impl Metadata {
    pub fn calculate(total_records: i64, page: i64, page_size: i64) -> Self {
        if total_records == 0 || page_size <= 0 {
            return Self::default();
        }
        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: (total_records + page_size - 1) / page_size,
            total_records,
        }
    }
}
