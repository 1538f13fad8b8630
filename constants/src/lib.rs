pub mod build_settings;
pub mod file_format;
