pub mod env;
pub mod semant_ty;
