/// Aggregates for the admin dashboard

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use super::contact_inquiry::ContactInquiry;
use super::payment::Payment;
use super::tax_return::{StatusCount, TaxReturn};
use super::user::{Role, User};

const RECENT_RETURNS: i64 = 5;

/// Active user counts by role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub customers: i64,
    pub accountants: i64,
    pub admins: i64,
    pub total: i64,
}

impl UserCounts {
    fn from_rows(rows: &[(Role, i64)]) -> Self {
        rows.iter()
            .fold(UserCounts::default(), |mut counts, (role, count)| {
                match role {
                    Role::Customer => counts.customers += count,
                    Role::Accountant => counts.accountants += count,
                    Role::Admin => counts.admins += count,
                }
                counts.total += count;
                counts
            })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub users: UserCounts,
    pub tax_returns_by_status: Vec<StatusCount>,
    pub open_inquiries: i64,

    /// Sum of completed payments
    pub revenue: Decimal,

    pub recent_tax_returns: Vec<TaxReturn>,
}

impl DashboardStats {
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let (users, tax_returns_by_status, open_inquiries, revenue, recent_tax_returns) = tokio::try_join!(
            User::count_by_role(pool),
            TaxReturn::count_by_status(pool),
            ContactInquiry::count_open(pool),
            Payment::total_revenue(pool),
            TaxReturn::recent(pool, RECENT_RETURNS),
        )?;

        Ok(Self {
            users: UserCounts::from_rows(&users),
            tax_returns_by_status,
            open_inquiries,
            revenue,
            recent_tax_returns,
        })
    }
}
