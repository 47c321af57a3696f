pub mod turbopuffer;

pub use turbopuffer::TurbopufferStore;
