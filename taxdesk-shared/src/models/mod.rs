//! Database models for TaxDesk
//!
//! Each model is a plain record struct mapped with `sqlx::FromRow` plus
//! associated async functions that issue parameterized SQL.
//!
//! # Models
//!
//! - `user`: User accounts, roles and soft deletion
//! - `profile`: Customer and accountant profiles
//! - `tax_return`: Tax returns, tax years and the cascade delete
//! - `income_source`, `expense`, `document`, `message`, `payment`: Tax return children
//! - `contact_inquiry`: Contact form submissions
//! - `settings`: System settings
//! - `audit_log`: Audit trail
//! - `stats`: Dashboard aggregates
//!
//! Enumerated columns are stored as TEXT guarded by CHECK constraints and are
//! exposed as Rust enums through [`text_enum!`].

use serde::Serialize;

/// Declares an enum stored as a TEXT column.
///
/// Generates `as_str`, `ALL`, `Display`, `FromStr` and the sqlx
/// `Type`/`Encode`/`Decode` impls for Postgres, plus serde using the same text.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Text stored in the database and used on the wire
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(text.parse()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

pub mod audit_log;
pub mod contact_inquiry;
pub mod document;
pub mod expense;
pub mod income_source;
pub mod message;
pub mod payment;
pub mod profile;
pub mod settings;
pub mod stats;
pub mod tax_return;
pub mod user;

/// A text value that does not name any variant of a [`text_enum!`] enum
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Enum type name
    pub kind: &'static str,

    /// The rejected text
    pub value: String,
}

text_enum! {
    /// Sort direction for list queries
    #[derive(Default)]
    pub enum SortOrder {
        Asc => "asc",
        #[default]
        Desc => "desc",
    }
}

impl SortOrder {
    /// SQL keyword for ORDER BY
    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Requested page of a list query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number
    pub page: i64,

    /// Rows per page
    pub limit: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;

    /// Highest page whose offset fits in an `i64` at any limit
    pub const MAX_PAGE: i64 = i64::MAX / Self::MAX_LIMIT;

    /// Builds a page from optional query parameters, clamping out-of-range values
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, Self::MAX_PAGE),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Pagination metadata returned with every list response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(page: Page, total: i64) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total,
            pages: (total + page.limit - 1) / page.limit,
        }
    }
}

/// One page of items plus its pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, page: Page, total: i64) -> Self {
        Self {
            items,
            pagination: Pagination::new(page, total),
        }
    }
}

/// Escapes LIKE wildcards in user input and wraps it in `%...%`
pub fn like_pattern(search: &str) -> String {
    let escaped = search
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert_eq!(SortOrder::default(), SortOrder::Desc);

        let err = "sideways".parse::<SortOrder>().unwrap_err();
        assert_eq!(err.kind, "SortOrder");
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_sort_order_serde() {
        let order: SortOrder = serde_json::from_str("\"asc\"").unwrap();
        assert_eq!(order, SortOrder::Asc);
        assert_eq!(serde_json::to_string(&SortOrder::Desc).unwrap(), "\"desc\"");
        assert!(serde_json::from_str::<SortOrder>("\"ASC\"").is_err());
    }

    #[test]
    fn test_page_defaults_and_clamping() {
        let page = Page::default();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 10);
        assert_eq!(page.offset(), 0);

        let page = Page::new(Some(3), Some(500));
        assert_eq!(page.limit, 100);
        assert_eq!(page.offset(), 200);

        let page = Page::new(Some(0), Some(0));
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 1);
    }

    #[test]
    fn test_huge_page_number_does_not_overflow() {
        let page = Page::new(Some(i64::MAX), Some(100));
        assert_eq!(page.page, Page::MAX_PAGE);
        assert!(page.offset() > 0);

        let page = Page::new(Some(i64::MAX), Some(1));
        assert!(page.offset() > 0);

        let page = Page::new(Some(i64::MIN), None);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_pagination_page_count() {
        let page = Page::new(Some(1), Some(10));
        assert_eq!(Pagination::new(page, 0).pages, 0);
        assert_eq!(Pagination::new(page, 10).pages, 1);
        assert_eq!(Pagination::new(page, 11).pages, 2);
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("smith"), "%smith%");
        assert_eq!(like_pattern(" 50%_off "), "%50\\%\\_off%");
    }
}
