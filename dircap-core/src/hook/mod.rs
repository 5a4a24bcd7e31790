pub mod inline;
pub mod vtable;
