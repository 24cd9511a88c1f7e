mod backends;
pub mod index;
pub mod publish;
pub mod refine;
pub mod run;
pub mod search;
pub mod status;
