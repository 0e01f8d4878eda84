use std::sync::Arc;

use crate::application::describe::DescribeService;
use crate::application::render::RenderService;

use super::rate_limit::ApiRateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub render: RenderService,
    pub describe: DescribeService,
    pub rate_limiter: Arc<ApiRateLimiter>,
}
