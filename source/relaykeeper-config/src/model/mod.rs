pub mod directive;
pub mod filter;
pub mod node;
pub mod source;

pub use directive::ParserDirective;
pub use filter::{FilterExpr, FilterField, Pattern};
pub use node::{Node, Scheme};
pub use source::{OutboundSpec, OutboundType, ProxySource};
