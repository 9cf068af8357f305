use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use relay_hub::Frame;

pub(super) fn frame_from_message(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(text.to_string()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Ping(data) => Frame::Ping(data.to_vec()),
        Message::Pong(data) => Frame::Pong(data.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}

pub(super) fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

/// Split an axum socket into the frame stream and sink the hub pump drives.
pub fn split_socket(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Frame, axum::Error>> + Unpin + Send,
    impl Sink<Frame, Error = axum::Error> + Unpin + Send + 'static,
) {
    let (sink, stream) = socket.split();
    let stream = stream.map(|msg| msg.map(frame_from_message));
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(message_from_frame(frame))));
    (stream, sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_control_frames() {
        assert_eq!(
            frame_from_message(Message::Text("hello".into())),
            Frame::Text("hello".into())
        );
        assert_eq!(frame_from_message(Message::Close(None)), Frame::Close);
        assert_eq!(
            frame_from_message(Message::Pong(vec![1u8, 2].into())),
            Frame::Pong(vec![1, 2])
        );
    }

    #[test]
    fn outbound_frames() {
        match message_from_frame(Frame::Text("a\nb".into())) {
            Message::Text(t) => assert_eq!(t.as_str(), "a\nb"),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(matches!(
            message_from_frame(Frame::Ping(Vec::new())),
            Message::Ping(_)
        ));
        assert!(matches!(
            message_from_frame(Frame::Close),
            Message::Close(None)
        ));
    }
}
