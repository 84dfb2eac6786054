//! gRPC adapter.
//!
//! Serves the same engine operations as the HTTP routes through tonic. Callers
//! authenticate with an `x-api-key` metadata entry; an `owner_service_id` of 0
//! stands for the authenticated caller.

mod status;

use std::sync::Arc;
use std::time::Duration;

use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::error;

use fundguard_auth::{ApiKey, ApiKeyError, ApiKeyValidator};
use fundguard_core::{
    Account, AccountId, OpenReservation, OwnerServiceId, Reservation, ReservationId,
};
use fundguard_infra::balance::BalanceEngine;

use crate::app::AppServices;

pub use status::{domain_error_to_status, engine_error_to_status};

pub mod proto {
    tonic::include_proto!("balance");
}

use proto::balance_service_server::{BalanceService, BalanceServiceServer};
use proto::{
    AccountReply, AccountRequest, Empty, OpenReservationRequest, ReservationReply,
    ReservationRequest, UpdateDeltaRequest,
};

const API_KEY_METADATA: &str = "x-api-key";

/// tonic service wired to the shared engine and key store.
pub fn balance_server(services: AppServices) -> BalanceServiceServer<BalanceGrpcService> {
    BalanceServiceServer::new(BalanceGrpcService::new(services))
}

pub struct BalanceGrpcService {
    engine: Arc<dyn BalanceEngine>,
    api_keys: Arc<dyn ApiKeyValidator>,
}

impl BalanceGrpcService {
    pub fn new(services: AppServices) -> Self {
        Self {
            engine: services.engine,
            api_keys: services.api_keys,
        }
    }

    async fn caller(&self, metadata: &MetadataMap) -> Result<OwnerServiceId, Status> {
        let key =
            api_key_from_metadata(metadata).map_err(|e| Status::unauthenticated(e.to_string()))?;

        match self.api_keys.resolve(&key).await {
            Ok(principal) => Ok(principal.service_id()),
            Err(ApiKeyError::Backend(msg)) => {
                error!(error = %msg, "api key store failure");
                Err(Status::internal("authentication backend unavailable"))
            }
            Err(e) => Err(Status::unauthenticated(e.to_string())),
        }
    }
}

fn api_key_from_metadata(metadata: &MetadataMap) -> Result<ApiKey, ApiKeyError> {
    let raw = metadata
        .get(API_KEY_METADATA)
        .ok_or(ApiKeyError::Missing)?
        .to_str()
        .map_err(|_| ApiKeyError::Unknown)?;
    ApiKey::parse(raw)
}

fn owner_or_caller(requested: i64, caller: OwnerServiceId) -> OwnerServiceId {
    if requested == 0 {
        caller
    } else {
        OwnerServiceId::new(requested)
    }
}

fn account_reply(account: &Account) -> AccountReply {
    AccountReply {
        id: account.id.get(),
        user_id: account.user_id.get(),
        current_amount: account.current_amount,
        max_amount: account.max_amount,
        reserved_amount: account.reserved_amount,
        available: account.available(),
    }
}

fn reservation_reply(reservation: &Reservation) -> ReservationReply {
    ReservationReply {
        id: reservation.id.get(),
        account_id: reservation.account_id.get(),
        owner_service_id: reservation.owner_service_id.get(),
        amount: reservation.amount,
        status: reservation.status.as_str().to_string(),
        idempotency_key: reservation.idempotency_key.clone(),
        expires_at: reservation.expires_at.timestamp(),
        created_at: reservation.created_at.timestamp(),
    }
}

#[tonic::async_trait]
impl BalanceService for BalanceGrpcService {
    async fn update_limit(
        &self,
        request: Request<UpdateDeltaRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.caller(request.metadata()).await?;
        let req = request.into_inner();

        self.engine
            .update_limit(AccountId::new(req.account_id), req.delta)
            .await
            .map_err(engine_error_to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn update_balance(
        &self,
        request: Request<UpdateDeltaRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.caller(request.metadata()).await?;
        let req = request.into_inner();

        self.engine
            .update_balance(AccountId::new(req.account_id), req.delta)
            .await
            .map_err(engine_error_to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn open_reservation(
        &self,
        request: Request<OpenReservationRequest>,
    ) -> Result<Response<ReservationReply>, Status> {
        let caller = self.caller(request.metadata()).await?;
        let req = request.into_inner();

        let command = OpenReservation {
            owner_service_id: owner_or_caller(req.owner_service_id, caller),
            account_id: AccountId::new(req.account_id),
            amount: req.amount,
            idempotency_key: req.idempotency_key,
            timeout: Duration::from_secs(req.timeout_seconds),
        };
        let reservation = self
            .engine
            .open_reservation(command)
            .await
            .map_err(engine_error_to_status)?;
        Ok(Response::new(reservation_reply(&reservation)))
    }

    async fn confirm_reservation(
        &self,
        request: Request<ReservationRequest>,
    ) -> Result<Response<Empty>, Status> {
        let caller = self.caller(request.metadata()).await?;
        let req = request.into_inner();

        self.engine
            .confirm_reservation(
                ReservationId::new(req.reservation_id),
                owner_or_caller(req.owner_service_id, caller),
            )
            .await
            .map_err(engine_error_to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn cancel_reservation(
        &self,
        request: Request<ReservationRequest>,
    ) -> Result<Response<Empty>, Status> {
        let caller = self.caller(request.metadata()).await?;
        let req = request.into_inner();

        self.engine
            .cancel_reservation(
                ReservationId::new(req.reservation_id),
                owner_or_caller(req.owner_service_id, caller),
            )
            .await
            .map_err(engine_error_to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn get_account(
        &self,
        request: Request<AccountRequest>,
    ) -> Result<Response<AccountReply>, Status> {
        self.caller(request.metadata()).await?;
        let req = request.into_inner();

        let account = self
            .engine
            .account(AccountId::new(req.account_id))
            .await
            .map_err(engine_error_to_status)?;
        Ok(Response::new(account_reply(&account)))
    }

    async fn get_reservation(
        &self,
        request: Request<ReservationRequest>,
    ) -> Result<Response<ReservationReply>, Status> {
        let caller = self.caller(request.metadata()).await?;
        let req = request.into_inner();

        let reservation = self
            .engine
            .reservation(
                ReservationId::new(req.reservation_id),
                owner_or_caller(req.owner_service_id, caller),
            )
            .await
            .map_err(engine_error_to_status)?;
        Ok(Response::new(reservation_reply(&reservation)))
    }
}
