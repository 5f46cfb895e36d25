//! Invite handshake.
//!
//! ```text
//! inviter (Y ephemeral)                       invitee (X invite key)
//!   ── wc_chatInvite, type 1, sha256(X) ──────▶
//!   ◀──────── result/error, type 0, response topic = DH(Y, X)
//!                                               thread topic = DH(Z, Y)
//! ```

use tracing::{debug, info, warn};

use super::ChatEngine;
use crate::crypto::{decode_key_hex, shared_secret, topic_from_public_key, EncodeOptions};
use crate::error::{ChatError, ChatResult};
use crate::events::ChatEvent;
use crate::identity::did::{account_from_did_pkh, compose_did_pkh, did_key_from_hex, hex_from_did_key, KeyKind};
use crate::jwt::{self, ClaimAction};
use crate::rpc::{ChatMethod, ErrorResponse, InviteParams, InviteResult, JsonRpcRequest, JsonRpcResponse};
use crate::types::{Invite, InviteStatus, ReceivedInvite, SentInvite, Thread};

impl ChatEngine {
    // ═══════════════════════════════════════════════════════════════════════
    // Inviter side
    // ═══════════════════════════════════════════════════════════════════════

    /// Send an invite.
    ///
    /// # Returns
    ///
    /// The request id, which the invitee's accept/reject echoes.
    pub async fn invite(&self, invite: Invite) -> ChatResult<u64> {
        invite.validate()?;
        let inviter = invite.inviter_account.as_str();
        let invitee = invite.invitee_account.as_str();
        self.identity.get_identity(inviter)?;

        let lock = self.locks.lock_for(&format!("invite:{}:{}", inviter, invitee));
        let _guard = lock.lock().await;

        let duplicate = self.sent_invites.filter(&|s| {
            s.inviter_account == inviter
                && s.invitee_account == invitee
                && s.status == InviteStatus::Pending
        })?;
        if !duplicate.is_empty() {
            return Err(ChatError::DuplicateInvite(invitee.to_string()));
        }
        let threaded = self
            .threads
            .filter(&|t| t.self_account == inviter && t.peer_account == invitee)?;
        if !threaded.is_empty() {
            return Err(ChatError::AlreadyThreaded(invitee.to_string()));
        }

        let key_y = self.crypto.generate_key_pair()?;
        let private_y = self.crypto.private_key(&key_y)?;
        let invite_topic = topic_from_public_key(&invite.invitee_public_key)?;

        let claims = self
            .identity
            .claims(inviter, ClaimAction::InviteProposal, &invite.message)?
            .with_aud(compose_did_pkh(invitee))
            .with_pke(did_key_from_hex(KeyKind::X25519, &key_y)?);
        let invite_auth = self.identity.generate_id_auth(inviter, &claims)?;
        let request = JsonRpcRequest::new(ChatMethod::Invite, &InviteParams { invite_auth })?;

        let response_topic =
            self.crypto
                .generate_shared_key(&key_y, &invite.invitee_public_key, None)?;
        let sym_key = self.crypto.sym_key(&response_topic)?;

        // Stored before publishing so a fast response always finds it
        self.sent_invites.set(
            &response_topic,
            SentInvite {
                id: request.id,
                message: invite.message.clone(),
                inviter_account: inviter.to_string(),
                invitee_account: invitee.to_string(),
                status: InviteStatus::Pending,
                timestamp: chrono::Utc::now().timestamp_millis(),
                response_topic: response_topic.clone(),
                inviter_pub_key_y: key_y.clone(),
                inviter_priv_key_y: hex::encode(private_y),
                sym_key: hex::encode(sym_key),
            },
        )?;

        let sent = async {
            self.transport.subscribe(&response_topic).await?;
            self.publish_request(
                &invite_topic,
                &request,
                ChatMethod::Invite,
                &EncodeOptions::Type1 {
                    sender_public_key: key_y.clone(),
                    receiver_public_key: invite.invitee_public_key.clone(),
                },
            )
            .await
        }
        .await;
        if let Err(e) = sent {
            self.sent_invites.delete(&response_topic, "invite not sent")?;
            self.crypto.delete_sym_key(&response_topic)?;
            self.crypto.delete_key_pair(&key_y)?;
            self.history.delete(&invite_topic);
            if let Err(unsub) = self.transport.unsubscribe(&response_topic).await {
                debug!(topic = %response_topic, error = %unsub, "Unsubscribe after failed invite");
            }
            return Err(e);
        }

        // Y lives on in the SentInvite record
        self.crypto.delete_key_pair(&key_y)?;
        info!(id = request.id, %inviter, %invitee, %response_topic, "Sent invite");
        Ok(request.id)
    }

    /// Handle the invitee's answer on a response topic.
    pub(super) async fn on_invite_response(
        &self,
        topic: &str,
        response: JsonRpcResponse,
    ) -> ChatResult<()> {
        let sent = self
            .sent_invites
            .get(topic)?
            .ok_or_else(|| ChatError::UnknownHandshake(topic.to_string()))?;
        if sent.status != InviteStatus::Pending {
            debug!(id = sent.id, %topic, status = ?sent.status, "Invite already settled");
            return Ok(());
        }

        match response.into_outcome() {
            Ok(value) => {
                let result: InviteResult = serde_json::from_value(value)
                    .map_err(|e| ChatError::InvalidParams(format!("Invalid invite result: {}", e)))?;
                let thread_topic = self
                    .complete_handshake(&sent, &result)
                    .await
                    .inspect_err(|e| {
                        warn!(id = sent.id, %topic, error = %e, "Invite approval rejected, handshake left pending")
                    })?;

                let invite = self.settle_sent_invite(&sent, InviteStatus::Approved).await?;
                info!(id = sent.id, %thread_topic, peer = %sent.invitee_account, "Invite accepted");
                self.emit(ChatEvent::InviteAccepted {
                    id: sent.id,
                    topic: thread_topic,
                    invite,
                });
                Ok(())
            }
            Err(error) if error.is_user_rejected() => {
                let invite = self.settle_sent_invite(&sent, InviteStatus::Rejected).await?;
                info!(id = sent.id, peer = %sent.invitee_account, "Invite rejected");
                self.emit(ChatEvent::InviteRejected {
                    id: sent.id,
                    topic: topic.to_string(),
                    invite,
                });
                Ok(())
            }
            Err(error) => {
                warn!(id = sent.id, %topic, code = error.code, message = %error.message, "Invite failed on peer, handshake left pending");
                Err(ChatError::PeerError(error))
            }
        }
    }

    /// Verify the approval and derive the thread.
    ///
    /// # Returns
    ///
    /// The thread topic.
    async fn complete_handshake(&self, sent: &SentInvite, result: &InviteResult) -> ChatResult<String> {
        let decoded = jwt::decode(&result.response_auth)?;
        let approver = self.authenticate(&decoded, ClaimAction::InviteApproval).await?;
        if approver != sent.invitee_account {
            return Err(ChatError::SignatureInvalid(format!(
                "Invite approved by {}, expected {}",
                approver, sent.invitee_account
            )));
        }
        let audience = account_from_did_pkh(decoded.claims.require_aud()?)?;
        if audience != sent.inviter_account {
            return Err(ChatError::SignatureInvalid(format!(
                "Approval addressed to {}",
                audience
            )));
        }

        let key_z = hex_from_did_key(KeyKind::X25519, &decoded.claims.sub)?;
        let private_y = decode_key_hex(&sent.inviter_priv_key_y)?;
        let sym_key = shared_secret(&private_y, &decode_key_hex(&key_z)?)?;
        let thread_topic = self.crypto.set_sym_key(&sym_key, None)?;

        self.threads.set(
            &thread_topic,
            Thread {
                topic: thread_topic.clone(),
                self_account: sent.inviter_account.clone(),
                peer_account: sent.invitee_account.clone(),
                sym_key: hex::encode(sym_key),
            },
        )?;
        self.ensure_message_log(&thread_topic)?;
        self.transport.subscribe(&thread_topic).await?;
        Ok(thread_topic)
    }

    /// Record the final status and stop listening on the response topic.
    async fn settle_sent_invite(&self, sent: &SentInvite, status: InviteStatus) -> ChatResult<SentInvite> {
        let invite = self
            .sent_invites
            .update(&sent.response_topic, &mut |s| s.status = status)?;
        if let Err(e) = self.transport.unsubscribe(&sent.response_topic).await {
            debug!(topic = %sent.response_topic, error = %e, "Unsubscribe from response topic failed");
        }
        Ok(invite)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Invitee side
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a proposal arriving on one of our invite topics.
    pub(super) async fn on_incoming_invite(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
        published_at: i64,
    ) -> ChatResult<()> {
        match self.receive_invite(topic, request, published_at).await {
            Ok(invite) => {
                self.received_invites
                    .set(&invite.id.to_string(), invite.clone())?;
                info!(id = invite.id, inviter = %invite.inviter_account, invitee = %invite.invitee_account, "Received invite");
                self.emit(ChatEvent::Invite {
                    id: invite.id,
                    topic: topic.to_string(),
                    invite,
                });
                Ok(())
            }
            Err(e) => {
                self.respond_to_failed_invite(request, &e).await;
                Err(e)
            }
        }
    }

    async fn receive_invite(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
        published_at: i64,
    ) -> ChatResult<ReceivedInvite> {
        let params: InviteParams = request.params()?;
        let decoded = jwt::decode(&params.invite_auth)?;
        decoded.claims.expect_action(ClaimAction::InviteProposal)?;

        let invitee = account_from_did_pkh(decoded.claims.require_aud()?)?;
        let invite_key = self.identity.get_invite_key(&invitee)?;
        if topic_from_public_key(&invite_key)? != topic {
            return Err(ChatError::InviteKeyNotFound(format!(
                "{} has no invite key for topic {}",
                invitee, topic
            )));
        }

        let inviter = self.authenticate(&decoded, ClaimAction::InviteProposal).await?;
        let key_y = match &decoded.claims.pke {
            Some(pke) => hex_from_did_key(KeyKind::X25519, pke)?,
            None => return Err(ChatError::InvalidParams("Invite without pke".to_string())),
        };

        let invite = ReceivedInvite {
            id: request.id,
            message: decoded.claims.sub.clone(),
            inviter_account: inviter,
            invitee_account: invitee,
            status: InviteStatus::Pending,
            timestamp: published_at,
            inviter_public_key: key_y,
            invitee_public_key: invite_key,
        };
        Invite {
            message: invite.message.clone(),
            inviter_account: invite.inviter_account.clone(),
            invitee_account: invite.invitee_account.clone(),
            invitee_public_key: invite.invitee_public_key.clone(),
        }
        .validate()?;
        Ok(invite)
    }

    /// Tell the inviter why its proposal was refused, when the response
    /// topic can still be derived.
    async fn respond_to_failed_invite(&self, request: &JsonRpcRequest, cause: &ChatError) {
        let derived = self.failed_invite_response_topic(request);

        match derived {
            Ok(response_topic) => {
                self.respond_with_error(request.id, &response_topic, ChatMethod::Invite, cause)
                    .await;
                if let Err(e) = self.crypto.delete_sym_key(&response_topic) {
                    debug!(error = %e, "Failed to discard response key");
                }
            }
            Err(e) => {
                warn!(id = request.id, cause = %cause, error = %e, "Cannot answer invalid invite");
            }
        }
    }

    fn failed_invite_response_topic(&self, request: &JsonRpcRequest) -> ChatResult<String> {
        let params: InviteParams = request.params()?;
        let decoded = jwt::decode(&params.invite_auth)?;
        let pke = decoded
            .claims
            .pke
            .as_deref()
            .ok_or_else(|| ChatError::InvalidParams("Invite without pke".to_string()))?;
        let key_y = hex_from_did_key(KeyKind::X25519, pke)?;
        let invitee = account_from_did_pkh(decoded.claims.require_aud()?)?;
        let invite_key = self.identity.get_invite_key(&invitee)?;
        self.crypto.generate_shared_key(&invite_key, &key_y, None)
    }

    fn pending_received_invite(&self, id: u64) -> ChatResult<ReceivedInvite> {
        let invite = self
            .received_invites
            .get(&id.to_string())?
            .ok_or(ChatError::InviteNotFound(id))?;
        if invite.status != InviteStatus::Pending {
            return Err(ChatError::InvalidParams(format!(
                "Invite {} is already {:?}",
                id, invite.status
            )));
        }
        Ok(invite)
    }

    /// Accept a received invite and open the thread.
    ///
    /// # Returns
    ///
    /// The thread topic.
    pub async fn accept(&self, id: u64) -> ChatResult<String> {
        let invite = self.pending_received_invite(id)?;
        let invitee = invite.invitee_account.as_str();

        let response_topic = self.crypto.generate_shared_key(
            &invite.invitee_public_key,
            &invite.inviter_public_key,
            None,
        )?;
        let key_z = self.crypto.generate_key_pair()?;
        let thread_topic = self
            .crypto
            .generate_shared_key(&key_z, &invite.inviter_public_key, None)?;
        let sym_key = self.crypto.sym_key(&thread_topic)?;

        let claims = self
            .identity
            .claims(
                invitee,
                ClaimAction::InviteApproval,
                did_key_from_hex(KeyKind::X25519, &key_z)?,
            )?
            .with_aud(compose_did_pkh(&invite.inviter_account));
        let response_auth = self.identity.generate_id_auth(invitee, &claims)?;
        self.send_result(
            id,
            &response_topic,
            ChatMethod::Invite,
            &InviteResult { response_auth },
        )
        .await?;

        self.threads.set(
            &thread_topic,
            Thread {
                topic: thread_topic.clone(),
                self_account: invitee.to_string(),
                peer_account: invite.inviter_account.clone(),
                sym_key: hex::encode(sym_key),
            },
        )?;
        self.ensure_message_log(&thread_topic)?;
        self.transport.subscribe(&thread_topic).await?;
        self.received_invites
            .update(&id.to_string(), &mut |i| i.status = InviteStatus::Approved)?;

        self.crypto.delete_key_pair(&key_z)?;
        self.crypto.delete_sym_key(&response_topic)?;
        info!(id, %thread_topic, peer = %invite.inviter_account, "Accepted invite");
        Ok(thread_topic)
    }

    /// Decline a received invite. Rejection is final.
    pub async fn reject(&self, id: u64) -> ChatResult<()> {
        let invite = self.pending_received_invite(id)?;
        let response_topic = self.crypto.generate_shared_key(
            &invite.invitee_public_key,
            &invite.inviter_public_key,
            None,
        )?;
        self.send_error(
            id,
            &response_topic,
            ChatMethod::Invite,
            ErrorResponse::user_rejected(),
        )
        .await?;
        self.received_invites
            .update(&id.to_string(), &mut |i| i.status = InviteStatus::Rejected)?;
        self.crypto.delete_sym_key(&response_topic)?;
        info!(id, peer = %invite.inviter_account, "Rejected invite");
        Ok(())
    }

    /// Reject every pending invite addressed to `account`.
    ///
    /// Answering needs the invite private key, so this runs before that key
    /// is discarded. Stops at the first failure, leaving the rest pending.
    ///
    /// # Returns
    ///
    /// How many invites were rejected.
    pub async fn reject_pending_invites(&self, account: &str) -> ChatResult<usize> {
        let pending = self.received_invites.filter(&|i| {
            i.invitee_account == account && i.status == InviteStatus::Pending
        })?;
        for invite in &pending {
            self.reject(invite.id).await?;
        }
        if !pending.is_empty() {
            info!(%account, rejected = pending.len(), "Rejected pending invites");
        }
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::registered_engine;
    use super::*;

    #[tokio::test]
    async fn test_response_on_unknown_topic_fails_closed() {
        let (engine, _, _relay) = registered_engine().await;
        let response = JsonRpcResponse::result(1, &true).unwrap();
        let result = engine.on_invite_response("nobody-knows", response).await;
        assert!(matches!(result, Err(ChatError::UnknownHandshake(_))));
    }

    #[tokio::test]
    async fn test_accept_unknown_invite() {
        let (engine, _, _relay) = registered_engine().await;
        assert!(matches!(
            engine.accept(99).await,
            Err(ChatError::InviteNotFound(99))
        ));
        assert!(matches!(
            engine.reject(99).await,
            Err(ChatError::InviteNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_invite_stores_pending_record() {
        let (engine, wallet, _relay) = registered_engine().await;
        let invitee_key = crate::crypto::Crypto::in_memory().generate_key_pair().unwrap();
        let id = engine
            .invite(Invite {
                message: "hey".to_string(),
                inviter_account: wallet.account().to_string(),
                invitee_account: "eip155:1:0xb0b".to_string(),
                invitee_public_key: invitee_key,
            })
            .await
            .unwrap();

        let sent = engine.get_sent_invites(wallet.account()).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, id);
        assert_eq!(sent[0].status, InviteStatus::Pending);
        assert!(engine.transport().is_subscribed(&sent[0].response_topic));
        assert!(engine.crypto().has_sym_key(&sent[0].response_topic));
    }

    #[tokio::test]
    async fn test_invite_requires_identity() {
        let (engine, _, _relay) = registered_engine().await;
        let invitee_key = crate::crypto::Crypto::in_memory().generate_key_pair().unwrap();
        let result = engine
            .invite(Invite {
                message: "hey".to_string(),
                inviter_account: "eip155:1:0xnobody".to_string(),
                invitee_account: "eip155:1:0xb0b".to_string(),
                invitee_public_key: invitee_key,
            })
            .await;
        assert!(matches!(result, Err(ChatError::IdentityNotFound(_))));
    }
}
