//! Method interception: which before, around and after advice applies to an
//! endpoint, and how it is applied.
//!
//! Interceptors are matched against endpoints once, while the messaging
//! system is built. Before and after interceptors become stages of a chain
//! around the endpoint's handler; around interceptors wrap the handler's
//! processor as tower layers.

pub mod around;
pub mod method;
pub mod pointcut;
pub mod registry;

pub use around::{
    AroundInterceptor, AroundInterceptorReference, AroundLayer, MethodInvocation,
    ProcessorService, ServiceProcessor, intercept_processor, processor_service,
};
pub use method::MethodInterceptor;
pub use pointcut::{EndpointDescriptor, Pointcut, wildcard_matches};
pub use registry::{InterceptorRegistry, ResolvedInterceptors};
