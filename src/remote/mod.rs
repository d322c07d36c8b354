pub mod x;
pub mod youtube;
