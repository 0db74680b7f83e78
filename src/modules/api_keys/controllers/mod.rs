pub mod api_key_controller;
