// Copyright (C) 2023 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::io::{Read, Write};

use speedy::{LittleEndian, Readable, Writable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorCode {
    Syntax,
    Semantic,
    System,
    Other,
}

/// Failure to turn stored bytes into an asset value or back.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code:?} error: {message}")]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
}

impl ParseError {
    pub fn new(code: ParseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ParseErrorCode::Syntax, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(ParseErrorCode::Semantic, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ParseErrorCode::System, message)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Bytes <-> value codec for one asset payload type. Every type that has
/// speedy derives gets this for free; hand-written codecs implement it
/// directly.
pub trait Serializable: Sized {
    fn serialize(&self, writer: &mut dyn Write) -> ParseResult<()>;
    fn deserialize(reader: &mut dyn Read) -> ParseResult<Self>;
}

impl<T> Serializable for T
where
    T: Writable<LittleEndian> + for<'a> Readable<'a, LittleEndian>,
{
    fn serialize(&self, writer: &mut dyn Write) -> ParseResult<()> {
        self.write_to_stream(writer)
            .map_err(|err| ParseError::new(ParseErrorCode::Other, err.to_string()))
    }

    fn deserialize(reader: &mut dyn Read) -> ParseResult<Self> {
        T::read_from_stream_buffered(reader).map_err(|err| ParseError::syntax(err.to_string()))
    }
}

#[cfg(test)]
mod test {
    use crate::{GeometryData, Serializable, TextureData};

    #[test]
    fn payload_roundtrip() {
        let geo = GeometryData::plane(1.0, 1.0, 2, 2);
        let mut bytes = Vec::new();
        geo.serialize(&mut bytes).unwrap();
        let restored = GeometryData::deserialize(&mut bytes.as_slice()).unwrap();
        assert_eq!(geo, restored);
    }

    #[test]
    fn truncated_payload_is_a_syntax_error() {
        let tex = TextureData::solid_color(2, 2, [255, 0, 0, 255]);
        let mut bytes = Vec::new();
        tex.serialize(&mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);
        let err = TextureData::deserialize(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(crate::ParseErrorCode::Syntax, err.code);
    }
}
