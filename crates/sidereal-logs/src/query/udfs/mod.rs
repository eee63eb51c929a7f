//! Custom DataFusion UDFs.
//!
//! - `cbor_extract(attributes, key)` reads one entry of a CBOR attribute map.

mod cbor;

pub use cbor::create_cbor_extract_udf;
pub(crate) use cbor::cbor_value_to_string;

use datafusion::logical_expr::ScalarUDF;

/// Every UDF the log tables need.
pub fn all_udfs() -> Vec<ScalarUDF> {
    vec![create_cbor_extract_udf()]
}
