pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod web;
