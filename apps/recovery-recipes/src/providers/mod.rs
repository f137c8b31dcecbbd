// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External service integrations: the recovery coordination service and its
//! alerts endpoints.

pub mod alerts;
pub mod recovery_service;

pub use alerts::{AlertsClient, SiweMessage, Subscription};
pub use recovery_service::{
    Challenge, ChallengeVerification, RecoveryParams, RecoveryServiceClient, ServiceError,
    ServiceRecovery, ServiceRecoveryStatus, SignedMessage,
};
