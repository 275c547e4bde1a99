pub mod category;
pub mod product;
pub mod upload;
