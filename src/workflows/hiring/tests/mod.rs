mod common;

mod batch;
mod routing;
