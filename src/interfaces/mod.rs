pub mod chat;
pub mod slack;
pub mod web;
