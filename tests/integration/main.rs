mod support;

mod flush;
mod pipeline;
