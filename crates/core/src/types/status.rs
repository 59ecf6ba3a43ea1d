//! Status enums for marketplace entities.
//!
//! Every status enum exposes `ALL` so distributions can report zero-count
//! buckets instead of silently omitting them.

use serde::{Deserialize, Serialize};

/// Generates `ALL` and a display label for a status enum.
macro_rules! status_labels {
    ($name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in display order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Human-readable label.
            #[must_use]
            pub const fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

/// Lifecycle of a waste listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    /// Visible to buyers.
    Live,
    /// Awaiting review or payment.
    #[default]
    Pending,
    /// No longer available.
    Sold,
}

status_labels!(ListingStatus {
    Live => "Live",
    Pending => "Pending",
    Sold => "Sold",
});

/// Lifecycle of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Cancelled,
}

status_labels!(TransactionStatus {
    Pending => "Pending",
    Completed => "Completed",
    Cancelled => "Cancelled",
});

/// Lifecycle of a buyer's bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BulkRequestStatus {
    #[default]
    Open,
    Matched,
    Closed,
}

status_labels!(BulkRequestStatus {
    Open => "Open",
    Matched => "Matched",
    Closed => "Closed",
});

/// Lifecycle of a factory's proposal against a bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

status_labels!(ProposalStatus {
    Pending => "Pending",
    Accepted => "Accepted",
    Rejected => "Rejected",
});

/// Lifecycle of an abuse or quality report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Open,
    Resolved,
}

status_labels!(ReportStatus {
    Open => "Open",
    Resolved => "Resolved",
});
