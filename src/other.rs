// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{BufRead, Write};

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::filelist::parse_evr;
use crate::metadata::{Changelog, Checksum, MetadataError, OtherXml, Package, XML_NS_OTHER};
use crate::utils;

const TAG_OTHERDATA: &[u8] = b"otherdata";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_VERSION: &[u8] = b"version";
const TAG_CHANGELOG: &[u8] = b"changelog";

impl OtherXml {
    pub fn filename() -> &'static str {
        "other.xml"
    }

    pub fn new_reader<R: BufRead>(reader: Reader<R>) -> OtherXmlReader<R> {
        OtherXmlReader { reader }
    }

    pub fn header_bytes(num_pkgs: usize) -> Result<Vec<u8>, MetadataError> {
        let mut buf = Vec::new();
        let mut writer = utils::create_xml_writer(&mut buf);
        writer.write_event(Event::Decl(BytesDecl::new(b"1.0", Some(b"UTF-8"), None)))?;

        // <otherdata xmlns="http://linux.duke.edu/metadata/other" packages="200">
        let mut other_tag = BytesStart::borrowed_name(TAG_OTHERDATA);
        other_tag.push_attribute(("xmlns", XML_NS_OTHER));
        other_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        writer.write_event(Event::Start(other_tag))?;
        drop(writer);
        Ok(buf)
    }

    pub fn package_bytes(package: &Package) -> Result<Vec<u8>, MetadataError> {
        let mut buf = Vec::new();
        let mut writer = utils::create_xml_writer(&mut buf);
        write_package(package, &mut writer)?;
        drop(writer);
        Ok(buf)
    }

    pub fn footer_bytes() -> Result<Vec<u8>, MetadataError> {
        let mut buf = Vec::new();
        let mut writer = utils::create_xml_writer(&mut buf);
        writer.write_event(Event::End(BytesEnd::borrowed(TAG_OTHERDATA)))?;
        writer.write_event(Event::Text(BytesText::from_plain_str("\n")))?;
        drop(writer);
        Ok(buf)
    }
}

pub fn write_package<W: Write>(
    package: &Package,
    writer: &mut Writer<W>,
) -> Result<(), MetadataError> {
    let mut package_tag = BytesStart::borrowed_name(TAG_PACKAGE);
    let (_, pkgid) = package.checksum().to_values()?;
    package_tag.push_attribute(("pkgid", pkgid));
    package_tag.push_attribute(("name", package.name()));
    package_tag.push_attribute(("arch", package.arch()));
    writer.write_event(Event::Start(package_tag.to_borrowed()))?;

    // <version epoch="0" ver="2.8.0" rel="5.el6"/>
    let (epoch, version, release) = package.evr().values();
    let mut version_tag = BytesStart::borrowed_name(TAG_VERSION);
    version_tag.push_attribute(("epoch", epoch));
    version_tag.push_attribute(("ver", version));
    version_tag.push_attribute(("rel", release));
    writer.write_event(Event::Empty(version_tag))?;

    for changelog in package.changelogs() {
        //  <changelog author="dalley &lt;dalley@redhat.com&gt; - 2.7.2-1" date="1251720000">- Update to 2.7.2</changelog>
        writer
            .create_element(TAG_CHANGELOG)
            .with_attribute(("author", changelog.author.as_str()))
            .with_attribute(("date", changelog.timestamp.to_string().as_str()))
            .write_text_content(BytesText::from_escaped(partial_escape(
                changelog.description.as_bytes(),
            )))?;
    }

    // </package>
    writer.write_event(Event::End(package_tag.to_end()))?;

    Ok(())
}

pub struct OtherXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> OtherXmlReader<R> {
    pub fn read_header(&mut self) -> Result<usize, MetadataError> {
        parse_header(&mut self.reader)
    }

    pub fn read_package(&mut self, package: &mut Option<Package>) -> Result<(), MetadataError> {
        parse_package(package, &mut self.reader)
    }
}

// <?xml version="1.0" encoding="UTF-8"?>
// <otherdata xmlns="http://linux.duke.edu/metadata/other" packages="35">
fn parse_header<R: BufRead>(reader: &mut Reader<R>) -> Result<usize, MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event(&mut buf)? {
            Event::Decl(_) => (),
            Event::Start(e) if e.name() == TAG_OTHERDATA => {
                let count = e
                    .try_get_attribute("packages")?
                    .ok_or(MetadataError::MissingAttributeError("packages"))?
                    .value;
                return Ok(std::str::from_utf8(&count)?.parse()?);
            }
            _ => return Err(MetadataError::MissingHeaderError),
        }
    }
}

//   <package pkgid="6a915b6e1ad740994aa9688d70a67ff2b6b72e0ced668794aeb27b2d0f2e237b" name="fontconfig" arch="x86_64">
//     <version epoch="0" ver="2.8.0" rel="5.el6"/>
//     <changelog author="Behdad Esfahbod &lt;besfahbo@redhat.com&gt; - 2.7.3-1" date="1252411200">- Update to 2.7.3</changelog>
//   </package>
fn parse_package<R: BufRead>(
    package: &mut Option<Package>,
    reader: &mut Reader<R>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event(&mut buf)? {
            Event::End(e) if e.name() == TAG_PACKAGE => break,
            Event::Start(e) => match e.name() {
                TAG_PACKAGE => {
                    let pkgid = e
                        .try_get_attribute("pkgid")?
                        .ok_or(MetadataError::MissingAttributeError("pkgid"))?
                        .unescape_and_decode_value(reader)?;
                    let name = e
                        .try_get_attribute("name")?
                        .ok_or(MetadataError::MissingAttributeError("name"))?
                        .unescape_and_decode_value(reader)?;
                    let arch = e
                        .try_get_attribute("arch")?
                        .ok_or(MetadataError::MissingAttributeError("arch"))?
                        .unescape_and_decode_value(reader)?;

                    if let Some(pkg) = package {
                        if pkg.pkgid() != pkgid {
                            return Err(MetadataError::InconsistentMetadataError(format!(
                                "pkgid {} in other.xml does not match {}",
                                pkgid,
                                pkg.pkgid()
                            )));
                        }
                    } else {
                        let mut pkg = Package::default();
                        pkg.set_name(name)
                            .set_arch(arch)
                            .set_checksum(Checksum::Unknown(pkgid));
                        *package = Some(pkg);
                    };
                }
                TAG_VERSION => {
                    let evr = parse_evr(reader, &e)?;
                    package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?
                        .set_evr(evr);
                }
                TAG_CHANGELOG => {
                    let changelog = parse_changelog(reader, &e)?;
                    package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?
                        .add_changelog(
                            &changelog.author,
                            &changelog.description,
                            changelog.timestamp,
                        );
                }
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_changelog<R: BufRead>(
    reader: &mut Reader<R>,
    open_tag: &BytesStart,
) -> Result<Changelog, MetadataError> {
    let mut changelog = Changelog::default();

    changelog.author = open_tag
        .try_get_attribute("author")?
        .ok_or(MetadataError::MissingAttributeError("author"))?
        .unescape_and_decode_value(reader)?;
    changelog.timestamp = open_tag
        .try_get_attribute("date")?
        .ok_or(MetadataError::MissingAttributeError("date"))?
        .unescape_and_decode_value(reader)?
        .parse()?;

    changelog.description = reader.read_text(open_tag.name(), &mut Vec::new())?;

    Ok(changelog)
}
