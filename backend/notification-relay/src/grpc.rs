// gRPC server for NotificationService
//
// Wire contract (package notification.v1):
//
//   service NotificationService {
//     rpc PushMessage(PushMessageRequest) returns (PushMessageResponse);
//   }
//   message PushMessageRequest  { string userID = 1; string event = 2; string data = 3; }
//   message PushMessageResponse { int32 code = 1; string message = 2; }
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tonic::{Request, Response, Status};
use tracing::error;

use crate::ingress::IngressAdapter;

pub const SERVICE_NAME: &str = "notification.v1.NotificationService";

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushMessageRequest {
    /// Recipient channel
    #[prost(string, tag = "1")]
    pub user_id: String,

    #[prost(string, tag = "2")]
    pub event: String,

    #[prost(string, tag = "3")]
    pub data: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushMessageResponse {
    /// 1 on acceptance, -1 on rejection
    #[prost(int32, tag = "1")]
    pub code: i32,

    #[prost(string, tag = "2")]
    pub message: String,
}

/// Server-side glue for NotificationService
pub mod notification_service_server {
    use super::*;
    use tonic::codegen::*;

    #[tonic::async_trait]
    pub trait NotificationService: std::marker::Send + std::marker::Sync + 'static {
        async fn push_message(
            &self,
            request: tonic::Request<PushMessageRequest>,
        ) -> std::result::Result<tonic::Response<PushMessageResponse>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct NotificationServiceServer<T: NotificationService> {
        inner: Arc<T>,
    }

    impl<T: NotificationService> NotificationServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: NotificationService> Clone for NotificationServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T: NotificationService> tonic::server::NamedService for NotificationServiceServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for NotificationServiceServer<T>
    where
        T: NotificationService,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/notification.v1.NotificationService/PushMessage" => {
                    let inner = Arc::clone(&self.inner);
                    let fut = async move {
                        let method = PushMessageSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    let mut response = http::Response::new(tonic::body::empty_body());
                    let headers = response.headers_mut();
                    headers.insert(
                        tonic::Status::GRPC_STATUS,
                        (tonic::Code::Unimplemented as i32).into(),
                    );
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        tonic::metadata::GRPC_CONTENT_TYPE,
                    );
                    Ok(response)
                }),
            }
        }
    }

    struct PushMessageSvc<T: NotificationService>(Arc<T>);

    impl<T: NotificationService> tonic::server::UnaryService<PushMessageRequest> for PushMessageSvc<T> {
        type Response = PushMessageResponse;
        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<PushMessageRequest>) -> Self::Future {
            let inner = Arc::clone(&self.0);
            let fut = async move { inner.push_message(request).await };
            Box::pin(fut)
        }
    }
}

use notification_service_server::NotificationService;

/// RPC front of the ingress adapter
#[derive(Clone)]
pub struct NotificationServiceImpl {
    ingress: IngressAdapter,
}

impl NotificationServiceImpl {
    pub fn new(ingress: IngressAdapter) -> Self {
        Self { ingress }
    }
}

#[tonic::async_trait]
impl NotificationService for NotificationServiceImpl {
    /// Validate and enqueue one message; never waits for delivery
    async fn push_message(
        &self,
        request: Request<PushMessageRequest>,
    ) -> Result<Response<PushMessageResponse>, Status> {
        let req = request.into_inner();

        let outcome = AssertUnwindSafe(self.ingress.push_message(&req.user_id, &req.event, &req.data))
            .catch_unwind()
            .await
            .map_err(|_| {
                error!(user_id = %req.user_id, "PushMessage panicked");
                Status::internal("internal error")
            })?;

        Ok(Response::new(PushMessageResponse {
            code: outcome.code(),
            message: outcome.message().to_string(),
        }))
    }
}
