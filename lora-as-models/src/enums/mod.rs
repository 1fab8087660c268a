pub mod common;
pub mod fuota;
