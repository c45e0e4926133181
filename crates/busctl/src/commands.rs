pub mod cleanup;
pub mod inspect;
pub mod monitor;
pub mod publish;
