pub mod auth_controller;
pub mod chat_controller;
pub mod events_controller;
pub mod session_controller;
pub mod stop_controller;
