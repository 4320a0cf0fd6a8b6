//! Raw upstream payload shapes and the canonical tariff snapshot.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

/// `YYYY-MM-DD`, the only date format used on the wire and in storage.
pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Render `date` as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT)
        .unwrap_or_else(|_| format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day()))
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw, DATE_FORMAT).ok()
}

/// Calendar date "now" in `offset`.
pub fn today_in(offset: UtcOffset) -> Date {
    OffsetDateTime::now_utc().to_offset(offset).date()
}

/// Top-level body of `GET /api/v1/tariffs/box`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawApiResponse {
    pub response: RawResponseEnvelope,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawResponseEnvelope {
    pub data: RawTariffData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawTariffData {
    pub dt_next_box: String,
    pub dt_till_max: String,
    pub warehouse_list: Vec<RawWarehouseTariff>,
}

/// One warehouse row as sent upstream. Rates stay untyped until normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawWarehouseTariff {
    pub warehouse_name: String,
    pub geo_name: String,
    pub box_delivery_base: Value,
    pub box_delivery_coef_expr: Value,
    pub box_delivery_liter: Value,
    pub box_delivery_marketplace_base: Value,
    pub box_delivery_marketplace_coef_expr: Value,
    pub box_delivery_marketplace_liter: Value,
    pub box_storage_base: Value,
    pub box_storage_coef_expr: Value,
    pub box_storage_liter: Value,
}

/// One warehouse's tariff figures for one calendar date.
///
/// Identity is `(date, warehouse_name)`. Missing rates are `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffSnapshot {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub warehouse_name: String,
    pub geo_name: String,
    pub dt_next_box: String,
    pub dt_till_max: String,
    pub box_delivery_base: f64,
    pub box_delivery_coef_expr: f64,
    pub box_delivery_liter: f64,
    pub box_delivery_marketplace_base: f64,
    pub box_delivery_marketplace_coef_expr: f64,
    pub box_delivery_marketplace_liter: f64,
    pub box_storage_base: f64,
    pub box_storage_coef_expr: f64,
    pub box_storage_liter: f64,
}

impl TariffSnapshot {
    /// The nine rates in sheet column order.
    pub fn rates(&self) -> [f64; 9] {
        [
            self.box_delivery_base,
            self.box_delivery_coef_expr,
            self.box_delivery_liter,
            self.box_delivery_marketplace_base,
            self.box_delivery_marketplace_coef_expr,
            self.box_delivery_marketplace_liter,
            self.box_storage_base,
            self.box_storage_coef_expr,
            self.box_storage_liter,
        ]
    }
}

mod iso_date {
    use serde::Serializer;
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*date))
    }
}

/// Column the sheet mirror sorts by, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    BoxDeliveryCoefExpr,
    BoxDeliveryBase,
    BoxDeliveryLiter,
    BoxDeliveryMarketplaceCoefExpr,
    BoxDeliveryMarketplaceBase,
    BoxDeliveryMarketplaceLiter,
    BoxStorageCoefExpr,
    BoxStorageBase,
    BoxStorageLiter,
    Date,
    WarehouseName,
    GeoName,
}

impl SortKey {
    pub const ALL: [Self; 12] = [
        Self::BoxDeliveryCoefExpr,
        Self::BoxDeliveryBase,
        Self::BoxDeliveryLiter,
        Self::BoxDeliveryMarketplaceCoefExpr,
        Self::BoxDeliveryMarketplaceBase,
        Self::BoxDeliveryMarketplaceLiter,
        Self::BoxStorageCoefExpr,
        Self::BoxStorageBase,
        Self::BoxStorageLiter,
        Self::Date,
        Self::WarehouseName,
        Self::GeoName,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BoxDeliveryCoefExpr => "boxDeliveryCoefExpr",
            Self::BoxDeliveryBase => "boxDeliveryBase",
            Self::BoxDeliveryLiter => "boxDeliveryLiter",
            Self::BoxDeliveryMarketplaceCoefExpr => "boxDeliveryMarketplaceCoefExpr",
            Self::BoxDeliveryMarketplaceBase => "boxDeliveryMarketplaceBase",
            Self::BoxDeliveryMarketplaceLiter => "boxDeliveryMarketplaceLiter",
            Self::BoxStorageCoefExpr => "boxStorageCoefExpr",
            Self::BoxStorageBase => "boxStorageBase",
            Self::BoxStorageLiter => "boxStorageLiter",
            Self::Date => "date",
            Self::WarehouseName => "warehouseName",
            Self::GeoName => "geoName",
        }
    }

    fn rate(self, snapshot: &TariffSnapshot) -> Option<f64> {
        let value = match self {
            Self::BoxDeliveryCoefExpr => snapshot.box_delivery_coef_expr,
            Self::BoxDeliveryBase => snapshot.box_delivery_base,
            Self::BoxDeliveryLiter => snapshot.box_delivery_liter,
            Self::BoxDeliveryMarketplaceCoefExpr => snapshot.box_delivery_marketplace_coef_expr,
            Self::BoxDeliveryMarketplaceBase => snapshot.box_delivery_marketplace_base,
            Self::BoxDeliveryMarketplaceLiter => snapshot.box_delivery_marketplace_liter,
            Self::BoxStorageCoefExpr => snapshot.box_storage_coef_expr,
            Self::BoxStorageBase => snapshot.box_storage_base,
            Self::BoxStorageLiter => snapshot.box_storage_liter,
            Self::Date | Self::WarehouseName | Self::GeoName => return None,
        };
        Some(value)
    }

    /// Ascending order by this key; `NaN` rates sort after every number.
    pub fn compare(self, left: &TariffSnapshot, right: &TariffSnapshot) -> Ordering {
        match self {
            Self::Date => left.date.cmp(&right.date),
            Self::WarehouseName => left.warehouse_name.cmp(&right.warehouse_name),
            Self::GeoName => left.geo_name.cmp(&right.geo_name),
            rate_key => {
                let left = rate_key.rate(left).unwrap_or(f64::NAN);
                let right = rate_key.rate(right).unwrap_or(f64::NAN);
                match (left.is_nan(), right.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => left.total_cmp(&right),
                }
            }
        }
    }
}

impl Display for SortKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown sort key name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort key '{0}'")]
pub struct UnknownSortKey(pub String);

impl FromStr for SortKey {
    type Err = UnknownSortKey;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == value)
            .ok_or_else(|| UnknownSortKey(value.to_string()))
    }
}

/// Stable ascending sort of `snapshots` by `key`.
pub fn sort_snapshots(snapshots: &mut [TariffSnapshot], key: SortKey) {
    snapshots.sort_by(|left, right| key.compare(left, right));
}
