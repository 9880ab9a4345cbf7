use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, FieldError};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
}

impl PageParams {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

impl PageQuery {
    pub fn resolve(&self) -> AppResult<PageParams> {
        let mut errors = Vec::new();
        let page = self.page.unwrap_or(1);
        if page < 1 {
            errors.push(FieldError::new("page", "page must be at least 1"));
        }
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            errors.push(FieldError::new(
                "limit",
                format!("limit must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        if !errors.is_empty() {
            return Err(AppError::validation(errors));
        }
        Ok(PageParams { page, limit })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(total: i64, params: PageParams) -> Self {
        Self {
            total,
            page: params.page,
            limit: params.limit,
            total_pages: total_pages(total, params.limit),
        }
    }
}

#[derive(Serialize)]
pub struct Paginated<T: Serialize> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, params: PageParams) -> Self {
        Self {
            data,
            pagination: Pagination::new(total, params),
        }
    }
}

pub fn total_pages(total: i64, limit: i64) -> i64 {
    if total == 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}
