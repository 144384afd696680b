pub mod column;
pub mod construction;
pub mod edge;
pub mod error;
pub mod evidence;
pub mod grammar;
pub mod network;
pub mod node;
pub mod pattern;
pub mod population;
pub mod token;
pub mod traversal;
