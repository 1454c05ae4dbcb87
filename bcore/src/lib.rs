pub mod buf;
pub mod prim;
