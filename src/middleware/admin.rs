/// Admin gate for privileged routes. Runs behind [`AuthGate`], reads the
/// claims it injected and applies the capability check; handlers never
/// compare roles themselves.
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::{AccessClaims, Capability};
use crate::error::{AppError, AuthError, ErrorResponse};

pub struct AdminGate;

impl<S, B> Transform<S, ServiceRequest> for AdminGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AdminGateMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AdminGateMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct AdminGateMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AdminGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let granted = req
            .extensions()
            .get::<AccessClaims>()
            .map(|claims| claims.role.grants(Capability::Administer));

        match granted {
            Some(true) => {
                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Some(false) => {
                tracing::warn!("non-admin request to an admin route");
                let response = HttpResponse::Forbidden().json(ErrorResponse::new(
                    "administrator privileges are required".to_string(),
                    "FORBIDDEN".to_string(),
                    StatusCode::FORBIDDEN.as_u16(),
                ));
                Box::pin(async move {
                    Err(
                        actix_web::error::InternalError::from_response("forbidden", response)
                            .into(),
                    )
                })
            }
            None => {
                // No claims in the request context: the route was mounted
                // without the auth gate in front.
                let err = AppError::Auth(AuthError::MissingToken);
                let response = err.to_response();
                Box::pin(async move {
                    Err(
                        actix_web::error::InternalError::from_response(err.to_string(), response)
                            .into(),
                    )
                })
            }
        }
    }
}
