mod common;
mod password;

pub use common::{random_hex, random_id};
pub use password::{hash_password, verify_password};
