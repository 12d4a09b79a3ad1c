pub mod xueqiu;

pub use xueqiu::XueqiuHandler;
