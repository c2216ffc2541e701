//! Payload transforms applied before events are queued

pub mod typecasting;

pub use typecasting::{
    apply_number_to_string_typecasting, transform, NumericKind, TypecastKind, TypecastRecord,
    Typecasted, ROOT_SEGMENT,
};
