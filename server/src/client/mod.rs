pub mod room_api;
