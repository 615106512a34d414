//! Integration tests for ship

mod test_firewall;
mod test_installer;
mod test_pipeline;
mod test_release;
mod test_validation;
