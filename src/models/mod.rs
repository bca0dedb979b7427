pub mod medicine;
pub mod order;
pub mod partner;
pub mod user;
