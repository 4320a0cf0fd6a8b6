//! Raw upstream rows to canonical [`TariffSnapshot`]s.

use time::Date;

use crate::domain::{RawApiResponse, TariffSnapshot};
use crate::number::rate_or_nan;

/// Map every warehouse of `raw` to a snapshot stamped with `processing_date`.
///
/// Unparsable rates become `NaN`; the row is still emitted. The envelope's
/// `dtNextBox`/`dtTillMax` are copied onto every row.
pub fn normalize(raw: &RawApiResponse, processing_date: Date) -> Vec<TariffSnapshot> {
    let data = &raw.response.data;
    data.warehouse_list
        .iter()
        .map(|row| TariffSnapshot {
            date: processing_date,
            warehouse_name: row.warehouse_name.clone(),
            geo_name: row.geo_name.clone(),
            dt_next_box: data.dt_next_box.clone(),
            dt_till_max: data.dt_till_max.clone(),
            box_delivery_base: rate_or_nan(&row.box_delivery_base),
            box_delivery_coef_expr: rate_or_nan(&row.box_delivery_coef_expr),
            box_delivery_liter: rate_or_nan(&row.box_delivery_liter),
            box_delivery_marketplace_base: rate_or_nan(&row.box_delivery_marketplace_base),
            box_delivery_marketplace_coef_expr: rate_or_nan(&row.box_delivery_marketplace_coef_expr),
            box_delivery_marketplace_liter: rate_or_nan(&row.box_delivery_marketplace_liter),
            box_storage_base: rate_or_nan(&row.box_storage_base),
            box_storage_coef_expr: rate_or_nan(&row.box_storage_coef_expr),
            box_storage_liter: rate_or_nan(&row.box_storage_liter),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn payload() -> RawApiResponse {
        serde_json::from_value(serde_json::json!({
            "response": {
                "data": {
                    "dtNextBox": "",
                    "dtTillMax": "2026-10-31",
                    "warehouseList": [
                        {
                            "warehouseName": "Коледино",
                            "geoName": "Центральный федеральный округ",
                            "boxDeliveryBase": "46",
                            "boxDeliveryCoefExpr": "1,050",
                            "boxDeliveryLiter": "14",
                            "boxDeliveryMarketplaceBase": "46",
                            "boxDeliveryMarketplaceCoefExpr": "105",
                            "boxDeliveryMarketplaceLiter": "14",
                            "boxStorageBase": "0,1",
                            "boxStorageCoefExpr": "115",
                            "boxStorageLiter": "0,1"
                        },
                        {
                            "warehouseName": "Тула",
                            "geoName": "",
                            "boxDeliveryBase": "-",
                            "boxDeliveryCoefExpr": "1 234,5",
                            "boxStorageBase": "-"
                        }
                    ]
                }
            }
        }))
        .expect("payload")
    }

    #[test]
    fn rows_are_stamped_with_processing_date() {
        let rows = normalize(&payload(), date!(2026 - 10 - 18));

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.date == date!(2026 - 10 - 18)));
        assert!(rows.iter().all(|row| row.dt_till_max == "2026-10-31"));
    }

    #[test]
    fn comma_decimals_become_floats() {
        let rows = normalize(&payload(), date!(2026 - 10 - 18));

        assert!((rows[0].box_delivery_coef_expr - 1.05).abs() < 1e-12);
        assert!((rows[0].box_storage_base - 0.1).abs() < 1e-12);
        assert_eq!(rows[0].box_storage_coef_expr, 115.0);
        assert_eq!(rows[1].box_delivery_coef_expr, 1234.5);
    }

    #[test]
    fn unparsable_rates_become_nan_without_dropping_the_row() {
        let rows = normalize(&payload(), date!(2026 - 10 - 18));
        let tula = &rows[1];

        assert_eq!(tula.warehouse_name, "Тула");
        assert!(tula.box_delivery_base.is_nan());
        assert!(tula.box_storage_base.is_nan());
        assert!(tula.box_storage_liter.is_nan());
    }

    #[test]
    fn empty_response_yields_no_rows() {
        assert!(normalize(&RawApiResponse::default(), date!(2026 - 10 - 18)).is_empty());
    }
}
