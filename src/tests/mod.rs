mod app;
mod support;
