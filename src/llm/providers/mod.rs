pub mod ollama;
pub mod remote;
pub mod vertex;
