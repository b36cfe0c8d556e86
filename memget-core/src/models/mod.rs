pub mod record;
pub mod settings;
