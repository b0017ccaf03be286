pub mod correlation;
pub mod decrypt;
