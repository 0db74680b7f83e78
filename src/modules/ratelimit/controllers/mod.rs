pub mod validate_controller;
