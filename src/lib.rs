pub mod basic;
pub mod common;
pub mod libcsv;
