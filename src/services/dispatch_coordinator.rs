//! services/dispatch_coordinator.rs
//! Una pasada del scheduler sobre los contactos de una campaña.
//!
//! Por contacto: Pending -> Due? -> SenderAssigned? -> HoursOpen? -> Dispatched
//! -> {Sent | Failed}. Cualquier "no" antes de Dispatched termina en Deferred.
//! No hay estado propio entre pasadas: todo vive en contacts y tracking_records,
//! así que repetir una pasada (por ejemplo tras un crash) es seguro.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::{
    config::scheduler_config::SchedulerConfig,
    models::{
        campaign_model::{CampaignStatus, Contact},
        dispatch_model::{ContactPreview, DeferReason, DispatchOutcome, PassSummary},
        sequence_model::{MessageTemplate, SequenceStep},
        tracking_model::{TrackingKey, TrackingStatus},
    },
    services::{
        business_hours::BusinessHoursGate,
        campaign_store::CampaignStore,
        mail_transport::{MailTransport, TransportError},
        sender_pool::{self, SenderPool},
        sequence_clock::{self, SequenceDecision},
        template_renderer,
        tracking_ledger::TrackingLedger,
    },
};

/// Datos compartidos por todos los contactos de una pasada.
struct PassContext {
    campaign_id: String,
    steps: Vec<SequenceStep>,
    templates: HashMap<String, MessageTemplate>,
    now: DateTime<Utc>,
    /// Reloj monotónico tomado junto con `now`.
    started: Instant,
    /// Remitentes con error de autenticación en esta pasada.
    /// Solo excluye; nunca decide cuota ni duplicados.
    excluded_senders: Mutex<HashSet<i64>>,
}

impl PassContext {
    fn excluded(&self) -> HashSet<i64> {
        self.excluded_senders
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// `now` más lo transcurrido en la pasada: instante real del envío.
    fn elapsed_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.now + elapsed
    }

    fn exclude(&self, sender_id: i64) {
        if let Ok(mut set) = self.excluded_senders.lock() {
            set.insert(sender_id);
        }
    }
}

#[derive(Clone)]
pub struct DispatchCoordinator {
    store: CampaignStore,
    sender_pool: SenderPool,
    gate: BusinessHoursGate,
    ledger: TrackingLedger,
    transport: Arc<dyn MailTransport>,
    config: SchedulerConfig,
}

impl DispatchCoordinator {
    pub fn new(
        store: CampaignStore,
        sender_pool: SenderPool,
        gate: BusinessHoursGate,
        ledger: TrackingLedger,
        transport: Arc<dyn MailTransport>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sender_pool,
            gate,
            ledger,
            transport,
            config,
        }
    }

    pub fn ledger(&self) -> &TrackingLedger {
        &self.ledger
    }

    pub async fn run_scheduler_pass(&self, campaign_id: &str) -> Result<PassSummary> {
        self.run_scheduler_pass_at(campaign_id, Utc::now()).await
    }

    /// Igual que `run_scheduler_pass` pero con un "ahora" explícito.
    /// Solo falla si no se pueden leer los datos de la campaña; los errores
    /// de cada contacto quedan en su resultado.
    pub async fn run_scheduler_pass_at(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PassSummary> {
        let mut summary = PassSummary::new(campaign_id);

        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| anyhow!("No existe la campaña {}", campaign_id))?;
        if campaign.status != CampaignStatus::Active {
            log::info!(
                "(run_scheduler_pass) Campaña {} está '{}', no se procesa.",
                campaign_id,
                campaign.status.as_str()
            );
            return Ok(summary);
        }

        let ctx = PassContext {
            campaign_id: campaign_id.to_string(),
            steps: self.store.active_steps(campaign_id).await?,
            templates: self.store.templates_for(campaign_id).await?,
            now,
            started: Instant::now(),
            excluded_senders: Mutex::new(HashSet::new()),
        };
        let contacts = self.store.list_active_contacts(campaign_id).await?;

        log::info!(
            "(run_scheduler_pass) Campaña {}: {} contactos, {} pasos activos.",
            campaign_id,
            contacts.len(),
            ctx.steps.len()
        );

        let deadline = Instant::now() + self.config.pass_timeout();
        let workers = self.config.worker_count.max(1);

        let outcomes: Vec<Option<DispatchOutcome>> = stream::iter(contacts)
            .map(|contact| {
                let ctx = &ctx;
                async move {
                    // Vencido el presupuesto no se empieza ningún contacto nuevo.
                    if Instant::now() >= deadline {
                        return None;
                    }
                    Some(self.process_contact_isolated(ctx, &contact).await)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        for outcome in &outcomes {
            match outcome {
                Some(outcome) => summary.record(outcome),
                None => summary.unreached += 1,
            }
        }

        log::info!(
            "(run_scheduler_pass) Campaña {} terminada: dispatched={}, deferred={}, failed={}, not_due={}, unreached={}",
            campaign_id,
            summary.dispatched,
            summary.deferred,
            summary.failed,
            summary.not_due,
            summary.unreached
        );
        Ok(summary)
    }

    /// Una pasada por cada campaña activa. Un fallo de una campaña no corta las demás.
    pub async fn run_active_campaigns(&self) -> Result<Vec<PassSummary>> {
        let campaigns = self.store.list_active_campaigns().await?;
        let mut summaries = Vec::with_capacity(campaigns.len());
        for campaign in campaigns {
            match self.run_scheduler_pass(&campaign.id).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => log::error!(
                    "(run_active_campaigns) Falló la pasada de {}: {:?}",
                    campaign.id,
                    e
                ),
            }
        }
        Ok(summaries)
    }

    /// Los errores de un contacto nunca abortan la pasada.
    async fn process_contact_isolated(&self, ctx: &PassContext, contact: &Contact) -> DispatchOutcome {
        match self.process_contact(ctx, contact).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!(
                    "(process_contact) Error procesando contacto {}: {:?}",
                    contact.id,
                    e
                );
                DispatchOutcome::Failed {
                    step: Some(contact.sequence_step + 1),
                    error: format!("{e:#}"),
                    permanent: false,
                }
            }
        }
    }

    async fn process_contact(&self, ctx: &PassContext, contact: &Contact) -> Result<DispatchOutcome> {
        let group = self.gate.resolve_group(contact.timezone_group.as_deref());
        let offset = self.gate.offset_for(group).unwrap_or(0);

        // 1) Pending -> Due
        let step_number = match sequence_clock::evaluate(contact, &ctx.steps, ctx.now, offset) {
            SequenceDecision::Complete => {
                let completed = self
                    .store
                    .mark_contact_completed(&ctx.campaign_id, contact.id, contact.sequence_step)
                    .await?;
                if !completed {
                    // Quedan pasos inactivos (o ninguno definido todavía): se espera.
                    log::info!(
                        "(process_contact) Contacto {} sin paso activo tras el {}; queda pendiente.",
                        contact.id,
                        contact.sequence_step
                    );
                    return Ok(DispatchOutcome::NotDue);
                }
                log::info!(
                    "(process_contact) Contacto {} completó la secuencia en el paso {}.",
                    contact.id,
                    contact.sequence_step
                );
                return Ok(DispatchOutcome::Complete);
            }
            SequenceDecision::NotDue { .. } => return Ok(DispatchOutcome::NotDue),
            SequenceDecision::Due { step, .. } => step,
        };

        // 2) Due -> SenderAssigned
        let today = self.sender_pool.quota_day(ctx.now);
        let Some(sender) = self
            .sender_pool
            .select_sender(&ctx.campaign_id, contact.id, today, &ctx.excluded())
            .await?
        else {
            log::info!(
                "(process_contact) Sin remitente elegible para contacto {}.",
                contact.id
            );
            return Ok(deferred(DeferReason::NoSender));
        };

        // 3) SenderAssigned -> HoursOpen
        if !self.gate.is_sendable(group, ctx.now) {
            return Ok(deferred(DeferReason::OutsideHours));
        }

        let step = ctx
            .steps
            .iter()
            .find(|s| s.step_number == step_number)
            .ok_or_else(|| anyhow!("Paso {} desapareció de la pasada", step_number))?;
        let template = ctx.templates.get(&step.template_key).ok_or_else(|| {
            anyhow!(
                "Plantilla '{}' no encontrada para el paso {}",
                step.template_key,
                step_number
            )
        })?;

        // 4) HoursOpen -> Dispatched (reserva idempotente + cupo)
        let key = TrackingKey::new(&ctx.campaign_id, contact.id, step_number);
        if !self.ledger.try_reserve(&key, &sender.email, ctx.now).await? {
            log::warn!(
                "(process_contact) Paso {} del contacto {} ya enviado o en curso; se omite.",
                step_number,
                contact.id
            );
            return Ok(deferred(DeferReason::AlreadySent));
        }

        if !self.sender_pool.claim_slot(sender.id, ctx.now).await? {
            log::info!(
                "(process_contact) {} se quedó sin cupo antes de enviar al contacto {}.",
                sender.email,
                contact.id
            );
            self.ledger
                .record_outcome(
                    &key,
                    TrackingStatus::Deferred,
                    &sender.email,
                    Some("sender quota exhausted"),
                    ctx.now,
                )
                .await?;
            return Ok(deferred(DeferReason::NoSender));
        }

        // 5) Dispatched -> Sent | Failed
        let email = template_renderer::render(template, contact, &sender);
        match self.transport.send(&sender, &email).await {
            Ok(sent) => {
                self.ledger
                    .record_sent_and_advance(
                        &key,
                        &sender.email,
                        &sent.message_id,
                        ctx.elapsed_now(),
                    )
                    .await?;
                log::info!(
                    "(process_contact) Paso {} enviado a {} desde {} (message_id={}).",
                    step_number,
                    contact.email,
                    sender.email,
                    sent.message_id
                );
                Ok(DispatchOutcome::Sent {
                    step: step_number,
                    sender_email: sender.email,
                    message_id: sent.message_id,
                })
            }
            Err(err) => {
                self.sender_pool.release_slot(sender.id, ctx.now).await?;
                self.handle_transport_error(ctx, &key, &sender.email, sender.id, err)
                    .await
            }
        }
    }

    async fn handle_transport_error(
        &self,
        ctx: &PassContext,
        key: &TrackingKey,
        sender_email: &str,
        sender_id: i64,
        err: TransportError,
    ) -> Result<DispatchOutcome> {
        let error = err.to_string();
        match err {
            TransportError::Transient(_) => {
                log::warn!(
                    "(process_contact) Fallo transitorio para contacto {} paso {}: {}",
                    key.contact_id,
                    key.step,
                    error
                );
                self.ledger
                    .record_outcome(key, TrackingStatus::Failed, sender_email, Some(&error), ctx.now)
                    .await?;
                Ok(DispatchOutcome::Failed {
                    step: Some(key.step),
                    error,
                    permanent: false,
                })
            }
            TransportError::Permanent(_) => {
                log::error!(
                    "(process_contact) Fallo permanente para contacto {} paso {}; se detiene la secuencia: {}",
                    key.contact_id,
                    key.step,
                    error
                );
                self.ledger
                    .record_failed_and_halt(key, sender_email, &error, ctx.now)
                    .await?;
                Ok(DispatchOutcome::Failed {
                    step: Some(key.step),
                    error,
                    permanent: true,
                })
            }
            TransportError::SenderAuth(_) => {
                log::error!(
                    "(process_contact) Remitente {} excluido por el resto de la pasada: {}",
                    sender_email,
                    error
                );
                ctx.exclude(sender_id);
                self.ledger
                    .record_outcome(key, TrackingStatus::Deferred, sender_email, Some(&error), ctx.now)
                    .await?;
                Ok(deferred(DeferReason::SenderAuth))
            }
        }
    }

    /// Lo que haría una pasada en `now`, sin escribir nada.
    /// Usa las mismas funciones que el envío real.
    pub async fn preview_campaign(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContactPreview>> {
        let steps = self.store.active_steps(campaign_id).await?;
        let contacts = self.store.list_active_contacts(campaign_id).await?;
        let eligible = self
            .sender_pool
            .eligible(campaign_id, self.sender_pool.quota_day(now))
            .await?;

        let previews = contacts
            .into_iter()
            .map(|contact| {
                let group = self.gate.resolve_group(contact.timezone_group.as_deref());
                let offset = self.gate.offset_for(group).unwrap_or(0);
                let decision = sequence_clock::evaluate(&contact, &steps, now, offset);
                ContactPreview {
                    contact_id: contact.id,
                    email: contact.email.clone(),
                    status: contact.status,
                    sequence_step: contact.sequence_step,
                    next_step: decision.step(),
                    due: decision.is_due(),
                    due_at: decision.due_at(),
                    sendable_now: self.gate.is_sendable(group, now),
                    assigned_sender: sender_pool::rotate(&eligible, contact.id)
                        .map(|s| s.email.clone()),
                    evaluated_at: now,
                }
            })
            .collect();

        Ok(previews)
    }
}

fn deferred(reason: DeferReason) -> DispatchOutcome {
    DispatchOutcome::Deferred { reason }
}
