//! `cbor_extract`: attribute lookup inside a CBOR-encoded map.

#![allow(clippy::as_conversions)]

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BinaryArray, StringArray};
use arrow::datatypes::DataType;
use ciborium::Value as CborValue;
use datafusion::common::{DataFusionError, Result};
use datafusion::logical_expr::{ColumnarValue, ScalarUDF, Volatility};
use datafusion::scalar::ScalarValue;

/// Create the `cbor_extract` UDF.
///
/// SQL: `cbor_extract(log_attributes, key)`
///
/// Returns the value stored under `key` rendered as text, or NULL when the
/// map has no such key (or maps it to null). Scans compare against
/// `COALESCE(cbor_extract(..), '')` and test membership with
/// `cbor_extract(..) IS NOT NULL`.
pub fn create_cbor_extract_udf() -> ScalarUDF {
    datafusion::logical_expr::create_udf(
        "cbor_extract",
        vec![DataType::Binary, DataType::Utf8],
        DataType::Utf8,
        Volatility::Immutable,
        Arc::new(cbor_extract_impl),
    )
}

fn cbor_extract_impl(args: &[ColumnarValue]) -> Result<ColumnarValue> {
    let [data, key] = args else {
        return Err(DataFusionError::Internal(format!(
            "cbor_extract expects 2 arguments, got {}",
            args.len()
        )));
    };

    match (data, key) {
        (ColumnarValue::Array(data), ColumnarValue::Scalar(key)) => {
            let data = binary_array(data)?;
            let Some(key) = scalar_key(key)? else {
                return Ok(ColumnarValue::Array(null_strings(data.len())));
            };
            let result: StringArray = data
                .iter()
                .map(|bytes| bytes.and_then(|b| lookup(b, key)))
                .collect();
            Ok(ColumnarValue::Array(Arc::new(result) as ArrayRef))
        }
        (ColumnarValue::Array(data), ColumnarValue::Array(keys)) => {
            let data = binary_array(data)?;
            let keys = keys.as_any().downcast_ref::<StringArray>().ok_or_else(|| {
                DataFusionError::Internal("cbor_extract expects a Utf8 key array".to_owned())
            })?;
            if data.len() != keys.len() {
                return Err(DataFusionError::Internal(
                    "cbor_extract: argument arrays differ in length".to_owned(),
                ));
            }
            let result: StringArray = data
                .iter()
                .zip(keys.iter())
                .map(|(bytes, key)| match (bytes, key) {
                    (Some(b), Some(k)) => lookup(b, k),
                    _ => None,
                })
                .collect();
            Ok(ColumnarValue::Array(Arc::new(result) as ArrayRef))
        }
        (ColumnarValue::Scalar(data), ColumnarValue::Scalar(key)) => {
            let bytes = match data {
                ScalarValue::Binary(bytes) => bytes.as_deref(),
                other => {
                    return Err(DataFusionError::Internal(format!(
                        "cbor_extract expects Binary data, got {}",
                        other.data_type()
                    )))
                }
            };
            let value = match (bytes, scalar_key(key)?) {
                (Some(b), Some(k)) => lookup(b, k),
                _ => None,
            };
            Ok(ColumnarValue::Scalar(ScalarValue::Utf8(value)))
        }
        (ColumnarValue::Scalar(_), ColumnarValue::Array(_)) => Err(DataFusionError::Internal(
            "cbor_extract: scalar data with array keys is not supported".to_owned(),
        )),
    }
}

fn binary_array(data: &ArrayRef) -> Result<&BinaryArray> {
    data.as_any()
        .downcast_ref::<BinaryArray>()
        .ok_or_else(|| DataFusionError::Internal("cbor_extract expects a Binary array".to_owned()))
}

fn scalar_key(key: &ScalarValue) -> Result<Option<&str>> {
    match key {
        ScalarValue::Utf8(key) => Ok(key.as_deref()),
        other => Err(DataFusionError::Internal(format!(
            "cbor_extract expects a Utf8 key, got {}",
            other.data_type()
        ))),
    }
}

fn null_strings(len: usize) -> ArrayRef {
    Arc::new(StringArray::new_null(len))
}

/// Value under `key` in a CBOR map, rendered as text. The first entry wins
/// when a key repeats.
fn lookup(bytes: &[u8], key: &str) -> Option<String> {
    let CborValue::Map(entries) = ciborium::from_reader::<CborValue, _>(bytes).ok()? else {
        return None;
    };

    entries.iter().find_map(|(k, v)| match k {
        CborValue::Text(k) if k == key => Some(cbor_value_to_string(v)),
        _ => None,
    })?
}

/// Text rendering of an attribute value. `None` for null.
pub(crate) fn cbor_value_to_string(value: &CborValue) -> Option<String> {
    match value {
        CborValue::Text(s) => Some(s.clone()),
        CborValue::Integer(i) => Some(i128::from(*i).to_string()),
        CborValue::Float(f) => Some(f.to_string()),
        CborValue::Bool(b) => Some(b.to_string()),
        CborValue::Array(_) | CborValue::Map(_) => serde_json::to_string(value).ok(),
        CborValue::Bytes(b) => Some(hex::encode(b)),
        CborValue::Tag(_, inner) => cbor_value_to_string(inner),
        CborValue::Null | _ => None,
    }
}
