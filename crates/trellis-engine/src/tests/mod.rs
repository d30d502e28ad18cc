//! Engine scenarios driven through the public bootstrap API.

mod reload;
mod support;
