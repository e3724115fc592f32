#![allow(dead_code)]

pub mod builders;
pub mod db;

pub use builders::UserBuilder;
pub use db::TestDb;
