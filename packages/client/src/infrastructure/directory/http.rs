//! REST directory client over reqwest.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::domain::{
    Credential, DeliveryState, DirectoryService, Message, MessageId, PageRequest, Participant,
    Room, RoomId, UserId,
};
use crate::error::DirectoryError;
use crate::infrastructure::dto::http::{
    ChatRoomDto, Envelope, LastReadRequest, MessageStatusDto, ParticipantDto, StatusUpdateRequest,
};
use crate::infrastructure::dto::websocket::ChatMessageDto;

/// Directory backed by the hub's REST API.
///
/// Every request carries the bearer credential; every response body is the
/// `{ "data": ... }` envelope.
#[derive(Debug, Clone)]
pub struct HttpDirectoryService {
    http: Client,
    base_url: String,
    credential: Credential,
}

impl HttpDirectoryService {
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self::with_client(Client::new(), base_url, credential)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, credential: Credential) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            credential,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DirectoryError> {
        let response = self.dispatch(request).await?;
        Self::check_status(response)
    }

    async fn dispatch(&self, request: RequestBuilder) -> Result<Response, DirectoryError> {
        request
            .header("Authorization", self.credential.authorization())
            .send()
            .await
            .map_err(|e| DirectoryError::Http(e.to_string()))
    }

    fn check_status(response: Response) -> Result<Response, DirectoryError> {
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DirectoryError::Unauthorized(
                format!("{} returned {}", response.url().path(), response.status()),
            )),
            status if !status.is_success() => Err(DirectoryError::Http(format!(
                "{} returned {}",
                response.url().path(),
                status
            ))),
            _ => Ok(response),
        }
    }

    async fn data<T: DeserializeOwned>(response: Response) -> Result<T, DirectoryError> {
        let path = response.url().path().to_string();
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(format!("{path}: {e}")))?;
        envelope.data.ok_or_else(|| {
            DirectoryError::Api(
                envelope
                    .message
                    .unwrap_or_else(|| format!("{path}: response carried no data")),
            )
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DirectoryError> {
        let response = self.send(self.http.get(self.url(path))).await?;
        Self::data(response).await
    }
}

fn convert<D, T>(dto: D) -> Result<T, DirectoryError>
where
    T: TryFrom<D, Error = String>,
{
    T::try_from(dto).map_err(DirectoryError::Decode)
}

#[async_trait]
impl DirectoryService for HttpDirectoryService {
    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<Room>, DirectoryError> {
        let rooms: Vec<ChatRoomDto> = self.get(&format!("/rooms/user/{user_id}")).await?;
        rooms.into_iter().map(convert).collect()
    }

    async fn room(&self, room_id: RoomId) -> Result<Room, DirectoryError> {
        let room: ChatRoomDto = self.get(&format!("/rooms/{room_id}")).await?;
        convert(room)
    }

    async fn messages(
        &self,
        room_id: RoomId,
        page: PageRequest,
    ) -> Result<Vec<Message>, DirectoryError> {
        let request = self
            .http
            .get(self.url(&format!("/messages/room/{room_id}")))
            .query(&[
                ("page", page.page.to_string()),
                ("size", page.size.to_string()),
                ("sort", "timestamp,asc".to_string()),
            ]);
        let response = self.send(request).await?;
        let messages: Vec<ChatMessageDto> = Self::data(response).await?;
        messages.into_iter().map(convert).collect()
    }

    async fn participants(&self, room_id: RoomId) -> Result<Vec<Participant>, DirectoryError> {
        let participants: Vec<ParticipantDto> =
            self.get(&format!("/participants/room/{room_id}")).await?;
        participants.into_iter().map(convert).collect()
    }

    async fn message_status(
        &self,
        user_id: UserId,
        message_id: MessageId,
    ) -> Result<Option<DeliveryState>, DirectoryError> {
        let request = self.http.get(self.url(&format!(
            "/message-status/user/{user_id}/message/{message_id}"
        )));
        let response = self.dispatch(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status: MessageStatusDto = Self::data(Self::check_status(response)?).await?;
        Ok(Some(status.status))
    }

    async fn report_status(
        &self,
        user_id: UserId,
        message_id: MessageId,
        state: DeliveryState,
    ) -> Result<(), DirectoryError> {
        let request = self
            .http
            .put(self.url("/message-status/update"))
            .json(&StatusUpdateRequest {
                user_id: user_id.value(),
                message_id: message_id.value(),
                status: state,
            });
        self.send(request).await?;
        Ok(())
    }

    async fn update_last_read(
        &self,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<(), DirectoryError> {
        let request = self
            .http
            .put(self.url("/participants/last-read"))
            .json(&LastReadRequest {
                user_id: user_id.value(),
                chat_room_id: room_id.value(),
                message_id: message_id.value(),
            });
        self.send(request).await?;
        Ok(())
    }
}
