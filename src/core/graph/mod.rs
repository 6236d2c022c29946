pub mod wait_for;

pub use wait_for::WaitForGraph;
