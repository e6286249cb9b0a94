use async_trait::async_trait;
use bytes::Bytes;
use livekit::prelude::{
    DataPacket, DataPacketKind, LocalTrackPublication, RemoteParticipant, RemoteTrackPublication,
    Room, RoomEvent, RoomOptions, TrackPublishOptions,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::track::{
    LiveKitTrack, extract_native_track, from_livekit_kind, from_livekit_source, to_livekit_source,
};
use crate::flow::media::MediaTrack;
use crate::flow::transport::{
    ParticipantInfo, PublishOptions, PublishedTrack, TrackPublicationInfo, Transport,
    TransportError, TransportEvent, TransportResult,
};

/// [`Transport`] over a LiveKit room
pub struct LiveKitTransport {
    agent_identity_prefix: String,
    room: RwLock<Option<Arc<Room>>>,
    /// Local publications by track sid
    publications: Mutex<HashMap<String, LocalTrackPublication>>,
}

impl LiveKitTransport {
    pub fn new(agent_identity_prefix: impl Into<String>) -> Self {
        Self {
            agent_identity_prefix: agent_identity_prefix.into(),
            room: RwLock::new(None),
            publications: Mutex::new(HashMap::new()),
        }
    }

    fn room(&self) -> TransportResult<Arc<Room>> {
        self.room.read().clone().ok_or(TransportError::NotConnected)
    }
}

impl Default for LiveKitTransport {
    fn default() -> Self {
        Self::new("agent")
    }
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> TransportResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.room.read().is_some() {
            return Err(TransportError::ConnectionFailed(
                "room already joined".to_string(),
            ));
        }

        let (room, mut room_events) = Room::connect(url, token, RoomOptions::default())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!(room = %room.name(), "Joined LiveKit room");
        *self.room.write() = Some(Arc::new(room));

        let (tx, rx) = mpsc::unbounded_channel();
        let agent_prefix = self.agent_identity_prefix.clone();
        let _ = tx.send(TransportEvent::Connected);

        tokio::spawn(async move {
            while let Some(event) = room_events.recv().await {
                let Some(event) = convert_event(event, &agent_prefix) else {
                    continue;
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!("LiveKit room event stream ended");
        });

        Ok(rx)
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.publications.lock().clear();
        let room = self.room.write().take();
        match room {
            Some(room) => room
                .close()
                .await
                .map_err(|e| TransportError::Internal(e.to_string())),
            None => Ok(()),
        }
    }

    fn room_metadata(&self) -> Option<String> {
        self.room
            .read()
            .as_ref()
            .map(|room| room.metadata())
            .filter(|metadata| !metadata.is_empty())
    }

    async fn publish_track(
        &self,
        track: Arc<dyn MediaTrack>,
        options: PublishOptions,
    ) -> TransportResult<PublishedTrack> {
        let room = self.room()?;
        let local = extract_native_track(&track)?.to_local_track(&options.name)?;

        let publication = room
            .local_participant()
            .publish_track(
                local,
                TrackPublishOptions {
                    source: to_livekit_source(options.source),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;

        let sid = publication.sid().to_string();
        self.publications.lock().insert(sid.clone(), publication);
        Ok(PublishedTrack {
            sid,
            name: options.name,
        })
    }

    async fn unpublish_track(&self, sid: &str) -> TransportResult<()> {
        let Some(publication) = self.publications.lock().remove(sid) else {
            debug!(track_sid = %sid, "Unpublish for unknown track");
            return Ok(());
        };
        let room = self.room()?;
        room.local_participant()
            .unpublish_track(&publication.sid())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Internal(e.to_string()))
    }

    async fn send_reliable(&self, payload: Bytes, topic: Option<&str>) -> TransportResult<()> {
        let room = self.room()?;
        room.local_participant()
            .publish_data(DataPacket {
                payload: payload.to_vec(),
                topic: topic.map(str::to_string),
                reliable: true,
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

fn participant_info(participant: &RemoteParticipant, agent_prefix: &str) -> ParticipantInfo {
    let identity = participant.identity().to_string();
    ParticipantInfo {
        is_agent: !agent_prefix.is_empty() && identity.starts_with(agent_prefix),
        name: participant.name(),
        identity,
    }
}

fn publication_info(publication: &RemoteTrackPublication) -> TrackPublicationInfo {
    TrackPublicationInfo {
        sid: publication.sid().to_string(),
        name: publication.name(),
        kind: from_livekit_kind(publication.kind()),
        source: from_livekit_source(publication.source()),
    }
}

fn convert_event(event: RoomEvent, agent_prefix: &str) -> Option<TransportEvent> {
    let converted = match event {
        RoomEvent::TrackSubscribed {
            track,
            publication,
            participant,
        } => TransportEvent::TrackSubscribed {
            track: Arc::new(LiveKitTrack::from_remote(track)),
            publication: publication_info(&publication),
            participant: participant_info(&participant, agent_prefix),
        },
        RoomEvent::TrackUnsubscribed {
            track,
            publication,
            participant,
        } => TransportEvent::TrackUnsubscribed {
            track: Arc::new(LiveKitTrack::from_remote(track)),
            publication: publication_info(&publication),
            participant: participant_info(&participant, agent_prefix),
        },
        RoomEvent::DataReceived {
            payload,
            topic,
            kind,
            participant,
        } => TransportEvent::DataReceived {
            payload: Bytes::copy_from_slice(&payload),
            participant: participant.as_ref().map(|p| participant_info(p, agent_prefix)),
            reliable: kind == DataPacketKind::Reliable,
            topic,
        },
        RoomEvent::ParticipantConnected(participant) => {
            TransportEvent::ParticipantConnected(participant_info(&participant, agent_prefix))
        }
        RoomEvent::ParticipantDisconnected(participant) => {
            TransportEvent::ParticipantDisconnected(participant_info(&participant, agent_prefix))
        }
        RoomEvent::RoomMetadataChanged { metadata, .. } => {
            TransportEvent::RoomMetadataChanged(metadata)
        }
        RoomEvent::Disconnected { reason } => TransportEvent::Disconnected {
            reason: format!("{reason:?}"),
        },
        _ => return None,
    };
    Some(converted)
}
