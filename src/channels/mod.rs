pub mod telegram;
pub mod whatsapp;
