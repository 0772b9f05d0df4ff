pub mod audit;
pub mod rbac;
pub mod user;
