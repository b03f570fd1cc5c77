//! Wire types and the flower trait model for Florafield.
//!
//! Everything here is shared between the server and any viewer: the genome
//! value types with their mutation rules, and the serde message shapes that
//! travel over a viewer connection. Nothing in this crate touches storage or
//! networking.

pub mod genome;
pub mod messages;

pub use genome::{FlowerGenome, FlowerTrait, Gene, GeneSpec};
pub use messages::{
    ClientMessage, FieldDelta, FlowerPacket, PositionUpdate, ServerMessage, ServerParameters, Vec2,
};
