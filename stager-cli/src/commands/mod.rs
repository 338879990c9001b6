pub mod daemon;
pub mod object;
pub mod reconcile;
pub mod safename;
pub mod status;
