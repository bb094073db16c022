pub mod search;
pub mod sum;
