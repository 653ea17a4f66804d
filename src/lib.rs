pub mod gfx;
pub mod render;

pub mod camera;
pub mod config;
pub mod cubemap;
pub mod geometry;
pub mod noise;

pub mod app;
pub mod cli;
