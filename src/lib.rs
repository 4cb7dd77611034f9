/*!
A WebSocket-to-TCP tunneling proxy.

A browser (or any WebSocket client) connects to this server, completes the
RFC 6455 opening handshake, and sends one JSON control message naming a
target:

```json
{"Service": "example.com:80"}
```

The server opens a raw TCP connection to that target and relays bytes in
both directions until either side closes: remote bytes are wrapped in
WebSocket frames on the way to the client, and client frames are unwrapped
on the way to the remote. This lets WebSocket-only clients reach arbitrary
TCP services through a single exposed listener.

# Architecture

One session flows through the modules in order:

* [`dispatch`] accepts the connection and assigns it a worker, either from
  a bounded pool (with back-pressure on the acceptor) or a fresh thread
  per connection;
* [`handshake`] upgrades the connection to WebSocket framing;
* [`frame`] decodes the first client frame, whose payload [`route`] parses
  into a `host:port` destination;
* [`tunnel`] connects to the remote and pumps both directions until either
  end closes, then tears the pair down jointly so no descriptor leaks.

No async runtime: the server uses threads throughout, which keeps every
blocking point an ordinary blocking read or condition wait.

Deliberately unsupported: frames needing the 64-bit extended length field,
fragmented messages, ping/pong and close frames, and TLS.
*/

pub mod dispatch;
pub mod frame;
pub mod handshake;
pub mod route;
pub mod tunnel;
