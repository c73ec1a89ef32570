use actix_web::{middleware, web, App, HttpServer};
use anyhow::{anyhow, Context};
use notification_relay::{
    broker::Broker,
    config::Config,
    grpc::{notification_service_server::NotificationServiceServer, NotificationServiceImpl},
    handlers::{self, ServiceInfo, StreamState},
    logging, metrics, IngressAdapter, QueryTokenAuthenticator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tonic::transport::Server as GrpcServer;
use tracing::{error, info};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env().context("failed to load configuration")?;
    cfg.validate().context("invalid configuration")?;
    logging::init_tracing(&cfg).context("failed to initialize logging")?;

    let grpc_addr: SocketAddr = cfg
        .grpc_addr()
        .parse()
        .with_context(|| format!("invalid gRPC address {}", cfg.grpc_addr()))?;
    let http_addr = cfg.http_addr();

    let (broker, coordinator) = Broker::start(cfg.broker());
    let ingress = IngressAdapter::new(broker.clone(), cfg.intake_timeout());

    let stream_state = StreamState::new(broker.clone(), Arc::new(QueryTokenAuthenticator))
        .with_keep_alive(cfg.keep_alive());
    let service_info = ServiceInfo::new(cfg.service_version.clone());

    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(stream_state.clone()))
            .app_data(web::Data::new(service_info.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .configure(handlers::register_routes)
    })
    .disable_signals()
    .bind(&http_addr)
    .with_context(|| format!("failed to bind HTTP listener on {}", http_addr))?
    .run();
    let http_handle = http_server.handle();
    let mut http_task = actix_web::rt::spawn(http_server);

    let grpc_shutdown = broker.shutdown_requested();
    let grpc_service = NotificationServiceImpl::new(ingress);
    let mut grpc_task = tokio::spawn(async move {
        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<NotificationServiceServer<NotificationServiceImpl>>()
            .await;

        GrpcServer::builder()
            .add_service(NotificationServiceServer::new(grpc_service))
            .add_service(health_service)
            .serve_with_shutdown(grpc_addr, grpc_shutdown)
            .await
    });

    info!(
        http_addr = %http_addr,
        grpc_addr = %grpc_addr,
        internal_api_addr = %cfg.internal_api_addr,
        version = %cfg.service_version,
        "notification relay started"
    );

    let mut grpc_joined = false;
    let outcome = tokio::select! {
        _ = shutdown_signal() => Ok(()),
        res = &mut http_task => Err(match res {
            Ok(Ok(())) => anyhow!("HTTP server exited unexpectedly"),
            Ok(Err(e)) => anyhow::Error::new(e).context("HTTP server failed"),
            Err(e) => anyhow::Error::new(e).context("HTTP server task failed"),
        }),
        res = &mut grpc_task => {
            grpc_joined = true;
            Err(match res {
                Ok(Ok(())) => anyhow!("gRPC server exited unexpectedly"),
                Ok(Err(e)) => anyhow::Error::new(e).context("gRPC server failed"),
                Err(e) => anyhow::Error::new(e).context("gRPC server task failed"),
            })
        }
    };

    if let Err(e) = &outcome {
        error!(error = %format!("{e:#}"), "server terminated");
    }

    // closes every live stream, which lets the graceful HTTP stop finish
    broker.shutdown();
    http_handle.stop(true).await;
    if !grpc_joined {
        match grpc_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "gRPC server failed"),
            Err(e) => error!(error = %e, "gRPC server task failed"),
        }
    }
    if let Err(e) = coordinator.await {
        error!(error = %e, "broker core task failed");
    }

    info!("notification relay stopped");
    outcome
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}
