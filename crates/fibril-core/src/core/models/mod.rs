pub mod couple;
pub mod fiber;
pub mod hand;
pub mod ids;
pub mod single;
pub mod solid;
pub mod world;
