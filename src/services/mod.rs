/// Command dispatch state machine.
pub mod dispatcher;
/// Timer event and quiz notice pumps.
pub mod events;
/// Health check service.
pub mod health_service;
/// Question bank population from JSON.
pub mod question_loader;
/// WebSocket connection and message handling service.
pub mod websocket_service;
