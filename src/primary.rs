// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{BufRead, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::filelist::parse_evr;
use crate::metadata::{
    Checksum, HeaderRange, MetadataError, Package, PackageFile, PrimaryXml, Requirement,
    XML_NS_COMMON, XML_NS_RPM,
};
use crate::utils;

const TAG_METADATA: &[u8] = b"metadata";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_NAME: &[u8] = b"name";
const TAG_VERSION: &[u8] = b"version";
const TAG_CHECKSUM: &[u8] = b"checksum";
const TAG_ARCH: &[u8] = b"arch";
const TAG_SUMMARY: &[u8] = b"summary";
const TAG_DESCRIPTION: &[u8] = b"description";
const TAG_PACKAGER: &[u8] = b"packager";
const TAG_URL: &[u8] = b"url";
const TAG_TIME: &[u8] = b"time";
const TAG_SIZE: &[u8] = b"size";
const TAG_LOCATION: &[u8] = b"location";
const TAG_FORMAT: &[u8] = b"format";

const TAG_RPM_LICENSE: &[u8] = b"rpm:license";
const TAG_RPM_VENDOR: &[u8] = b"rpm:vendor";
const TAG_RPM_GROUP: &[u8] = b"rpm:group";
const TAG_RPM_BUILDHOST: &[u8] = b"rpm:buildhost";
const TAG_RPM_SOURCERPM: &[u8] = b"rpm:sourcerpm";
const TAG_RPM_HEADER_RANGE: &[u8] = b"rpm:header-range";

const TAG_RPM_ENTRY: &[u8] = b"rpm:entry";
const TAG_RPM_PROVIDES: &[u8] = b"rpm:provides";
const TAG_RPM_REQUIRES: &[u8] = b"rpm:requires";
const TAG_RPM_CONFLICTS: &[u8] = b"rpm:conflicts";
const TAG_RPM_OBSOLETES: &[u8] = b"rpm:obsoletes";
const TAG_RPM_SUGGESTS: &[u8] = b"rpm:suggests";
const TAG_RPM_ENHANCES: &[u8] = b"rpm:enhances";
const TAG_RPM_RECOMMENDS: &[u8] = b"rpm:recommends";
const TAG_RPM_SUPPLEMENTS: &[u8] = b"rpm:supplements";
const TAG_FILE: &[u8] = b"file";

impl PrimaryXml {
    pub fn filename() -> &'static str {
        "primary.xml"
    }

    pub fn new_reader<R: BufRead>(reader: Reader<R>) -> PrimaryXmlReader<R> {
        PrimaryXmlReader { reader }
    }

    /// The XML declaration and document opening tag, including the `packages` count.
    pub fn header_bytes(num_pkgs: usize) -> Result<Vec<u8>, MetadataError> {
        let mut buf = Vec::new();
        let mut writer = utils::create_xml_writer(&mut buf);
        writer.write_event(Event::Decl(BytesDecl::new(b"1.0", Some(b"UTF-8"), None)))?;

        let mut metadata_tag = BytesStart::borrowed_name(TAG_METADATA);
        metadata_tag.push_attribute(("xmlns", XML_NS_COMMON));
        metadata_tag.push_attribute(("xmlns:rpm", XML_NS_RPM));
        metadata_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        writer.write_event(Event::Start(metadata_tag))?;
        drop(writer);
        Ok(buf)
    }

    /// One complete `<package>` element, serialized standalone.
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
        writer.write_event(Event::End(BytesEnd::borrowed(TAG_METADATA)))?;
        writer.write_event(Event::Text(BytesText::from_plain_str("\n")))?;
        drop(writer);
        Ok(buf)
    }
}

pub fn write_package<W: Write>(
    package: &Package,
    writer: &mut Writer<W>,
) -> Result<(), MetadataError> {
    // <package type="rpm">
    let mut package_tag = BytesStart::borrowed_name(TAG_PACKAGE);
    package_tag.push_attribute(("type", "rpm"));
    writer.write_event(Event::Start(package_tag.to_borrowed()))?;

    // <name>horse</name>
    writer
        .create_element(TAG_NAME)
        .write_text_content(BytesText::from_plain_str(&package.name))?;

    // <arch>noarch</arch>
    writer
        .create_element(TAG_ARCH)
        .write_text_content(BytesText::from_plain_str(&package.arch))?;

    // <version epoch="0" ver="4.1" rel="1"/>
    writer
        .create_element(TAG_VERSION)
        .with_attribute(("epoch", package.evr.epoch.as_str()))
        .with_attribute(("ver", package.evr.version.as_str()))
        .with_attribute(("rel", package.evr.release.as_str()))
        .write_empty()?;

    // <checksum type="sha256" pkgid="YES">6d0fd7f08cef...</checksum>
    let (checksum_type, checksum_value) = package.checksum.to_values()?;
    writer
        .create_element(TAG_CHECKSUM)
        .with_attribute(("type", checksum_type))
        .with_attribute(("pkgid", "YES"))
        .write_text_content(BytesText::from_plain_str(checksum_value))?;

    // <summary>A dummy package of horse</summary>
    writer
        .create_element(TAG_SUMMARY)
        .write_text_content(BytesText::from_plain_str(&package.summary))?;

    // <description>A dummy package of horse</description>
    writer
        .create_element(TAG_DESCRIPTION)
        .write_text_content(BytesText::from_plain_str(&package.description))?;

    // <packager>Bojack Horseman</packager>
    writer
        .create_element(TAG_PACKAGER)
        .write_text_content(BytesText::from_plain_str(&package.packager))?;

    // <url>http://arandomaddress.com</url>
    writer
        .create_element(TAG_URL)
        .write_text_content(BytesText::from_plain_str(&package.url))?;

    // <time file="1615451135" build="1331831374"/>
    writer
        .create_element(TAG_TIME)
        .with_attribute(("file", package.time_file.to_string().as_str()))
        .with_attribute(("build", package.time_build.to_string().as_str()))
        .write_empty()?;

    // <size package="1846" installed="42" archive="296"/>
    writer
        .create_element(TAG_SIZE)
        .with_attribute(("package", package.size_package.to_string().as_str()))
        .with_attribute(("installed", package.size_installed.to_string().as_str()))
        .with_attribute(("archive", package.size_archive.to_string().as_str()))
        .write_empty()?;

    // <location href="horse-4.1-1.noarch.rpm"/>
    let mut location_tag = BytesStart::borrowed_name(TAG_LOCATION);
    if let Some(base) = package.location_base() {
        location_tag.push_attribute(("xml:base", base));
    }
    location_tag.push_attribute(("href", package.location_href.as_str()));
    writer.write_event(Event::Empty(location_tag))?;

    // <format>
    let format_tag = BytesStart::borrowed_name(TAG_FORMAT);
    writer.write_event(Event::Start(format_tag.to_borrowed()))?;

    writer
        .create_element(TAG_RPM_LICENSE)
        .write_text_content(BytesText::from_plain_str(package.rpm_license.as_str()))?;

    writer
        .create_element(TAG_RPM_VENDOR)
        .write_text_content(BytesText::from_plain_str(package.rpm_vendor.as_str()))?;

    writer
        .create_element(TAG_RPM_GROUP)
        .write_text_content(BytesText::from_plain_str(package.rpm_group.as_str()))?;

    writer
        .create_element(TAG_RPM_BUILDHOST)
        .write_text_content(BytesText::from_plain_str(package.rpm_buildhost.as_str()))?;

    writer
        .create_element(TAG_RPM_SOURCERPM)
        .write_text_content(BytesText::from_plain_str(package.rpm_sourcerpm.as_str()))?;

    // <rpm:header-range start="280" end="1697"/>
    let header_start = package.rpm_header_range.start.to_string();
    let header_end = package.rpm_header_range.end.to_string();
    writer
        .create_element(TAG_RPM_HEADER_RANGE)
        .with_attribute(("start", header_start.as_str()))
        .with_attribute(("end", header_end.as_str()))
        .write_empty()?;

    write_requirement_section(writer, TAG_RPM_PROVIDES, &package.rpm_provides)?;
    write_requirement_section(writer, TAG_RPM_REQUIRES, &package.rpm_requires)?;
    write_requirement_section(writer, TAG_RPM_CONFLICTS, &package.rpm_conflicts)?;
    write_requirement_section(writer, TAG_RPM_OBSOLETES, &package.rpm_obsoletes)?;
    write_requirement_section(writer, TAG_RPM_SUGGESTS, &package.rpm_suggests)?;
    write_requirement_section(writer, TAG_RPM_ENHANCES, &package.rpm_enhances)?;
    write_requirement_section(writer, TAG_RPM_RECOMMENDS, &package.rpm_recommends)?;
    write_requirement_section(writer, TAG_RPM_SUPPLEMENTS, &package.rpm_supplements)?;

    // primary.xml carries only the "primary" file subset - the full manifest lives in filelists.xml
    // <file>/usr/bin/bash</file>
    package
        .files()
        .iter()
        .filter(|&f| include_file(f))
        .try_for_each(|f| crate::filelist::write_file_element(writer, f))?;

    // </format>
    writer.write_event(Event::End(format_tag.to_end()))?;

    // </package>
    writer.write_event(Event::End(package_tag.to_end()))?;

    Ok(())
}

pub(crate) fn include_file(f: &PackageFile) -> bool {
    // strange algorithm, but it's what the original uses
    f.path.starts_with("/etc/")
        || f.path.contains("bin/")
        || f.path.starts_with("/usr/lib/sendmail")
}

// <rpm:provides>
//   <rpm:entry name="horse" flags="EQ" epoch="0" ver="4.1" rel="1"/>
// </rpm:provides>
fn write_requirement_section<W: Write, N: AsRef<[u8]> + Sized>(
    writer: &mut Writer<W>,
    section_name: N,
    entry_list: &[Requirement],
) -> Result<(), MetadataError> {
    // skip writing empty sections
    if entry_list.is_empty() {
        return Ok(());
    }

    let section_tag = BytesStart::borrowed_name(section_name.as_ref());
    writer.write_event(Event::Start(section_tag.to_borrowed()))?;

    for entry in entry_list {
        let mut entry_tag = BytesStart::borrowed_name(TAG_RPM_ENTRY);
        entry_tag.push_attribute(("name", entry.name.as_str()));

        if let Some(flags) = &entry.flags {
            entry_tag.push_attribute(("flags", flags.as_str()));
        }

        if let Some(epoch) = &entry.epoch {
            entry_tag.push_attribute(("epoch", epoch.as_str()));
        }

        if let Some(version) = &entry.version {
            entry_tag.push_attribute(("ver", version.as_str()));
        }

        if let Some(release) = &entry.release {
            entry_tag.push_attribute(("rel", release.as_str()));
        }

        if entry.preinstall {
            entry_tag.push_attribute(("pre", "1"));
        }
        writer.write_event(Event::Empty(entry_tag))?;
    }

    writer.write_event(Event::End(section_tag.to_end()))?;

    Ok(())
}

pub struct PrimaryXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> PrimaryXmlReader<R> {
    pub fn read_header(&mut self) -> Result<usize, MetadataError> {
        parse_header(&mut self.reader)
    }

    pub fn read_package(&mut self, package: &mut Option<Package>) -> Result<(), MetadataError> {
        parse_package(package, &mut self.reader)
    }
}

// <?xml version="1.0" encoding="UTF-8"?>
// <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="..." packages="35">
fn parse_header<R: BufRead>(reader: &mut Reader<R>) -> Result<usize, MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event(&mut buf)? {
            Event::Decl(_) => (),
            Event::Start(e) if e.name() == TAG_METADATA => {
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

fn parse_package<R: BufRead>(
    package: &mut Option<Package>,
    reader: &mut Reader<R>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();
    let mut text_buf = Vec::new();

    loop {
        match reader.read_event(&mut buf)? {
            Event::End(e) if e.name() == TAG_PACKAGE => break,
            Event::Start(e) => match e.name() {
                TAG_PACKAGE => {
                    *package = Some(Package::default());
                }
                TAG_NAME => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.name = reader.read_text(TAG_NAME, &mut text_buf)?;
                }
                TAG_VERSION => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.set_evr(parse_evr(reader, &e)?);
                }
                TAG_CHECKSUM => {
                    let checksum_type = e
                        .try_get_attribute("type")?
                        .ok_or(MetadataError::MissingAttributeError("type"))?
                        .unescape_and_decode_value(reader)?;
                    let checksum_value = reader.read_text(TAG_CHECKSUM, &mut text_buf)?;
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.checksum = Checksum::try_create(checksum_type, checksum_value)?;
                }
                TAG_ARCH => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.arch = reader.read_text(TAG_ARCH, &mut text_buf)?;
                }
                TAG_SUMMARY => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.summary = reader.read_text(TAG_SUMMARY, &mut text_buf)?;
                }
                TAG_DESCRIPTION => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.description = reader.read_text(TAG_DESCRIPTION, &mut text_buf)?;
                }
                TAG_PACKAGER => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.packager = reader.read_text(TAG_PACKAGER, &mut text_buf)?;
                }
                TAG_URL => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.url = reader.read_text(TAG_URL, &mut text_buf)?;
                }
                TAG_TIME => {
                    let time_file = e
                        .try_get_attribute("file")?
                        .ok_or(MetadataError::MissingAttributeError("file"))?
                        .unescape_and_decode_value(reader)?
                        .parse()?;
                    let time_build = e
                        .try_get_attribute("build")?
                        .ok_or(MetadataError::MissingAttributeError("build"))?
                        .unescape_and_decode_value(reader)?
                        .parse()?;
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.time_file = time_file;
                    pkg.time_build = time_build;
                }
                TAG_SIZE => {
                    let size_package = e
                        .try_get_attribute("package")?
                        .ok_or(MetadataError::MissingAttributeError("package"))?
                        .unescape_and_decode_value(reader)?
                        .parse()?;
                    let size_installed = e
                        .try_get_attribute("installed")?
                        .ok_or(MetadataError::MissingAttributeError("installed"))?
                        .unescape_and_decode_value(reader)?
                        .parse()?;
                    let size_archive = e
                        .try_get_attribute("archive")?
                        .ok_or(MetadataError::MissingAttributeError("archive"))?
                        .unescape_and_decode_value(reader)?
                        .parse()?;
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.size_package = size_package;
                    pkg.size_installed = size_installed;
                    pkg.size_archive = size_archive;
                }
                TAG_LOCATION => {
                    let href = e
                        .try_get_attribute("href")?
                        .ok_or(MetadataError::MissingAttributeError("href"))?
                        .unescape_and_decode_value(reader)?;
                    let base = e
                        .try_get_attribute("xml:base")?
                        .and_then(|attr| attr.unescape_and_decode_value(reader).ok());
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    pkg.location_href = href;
                    pkg.location_base = base;
                }
                TAG_FORMAT => {
                    let pkg = package
                        .as_mut()
                        .ok_or(MetadataError::MissingHeaderError)?;
                    parse_format(pkg, reader)?;
                }
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
        text_buf.clear();
    }

    Ok(())
}

fn parse_format<R: BufRead>(
    package: &mut Package,
    reader: &mut Reader<R>,
) -> Result<(), MetadataError> {
    let mut format_buf = Vec::new();
    let mut format_text_buf = Vec::new();
    loop {
        match reader.read_event(&mut format_buf)? {
            Event::End(e) if e.name() == TAG_FORMAT => break,
            Event::Start(e) => match e.name() {
                TAG_RPM_LICENSE => {
                    package.rpm_license = reader.read_text(TAG_RPM_LICENSE, &mut format_text_buf)?
                }
                TAG_RPM_VENDOR => {
                    package.rpm_vendor = reader.read_text(TAG_RPM_VENDOR, &mut format_text_buf)?
                }
                TAG_RPM_GROUP => {
                    package.rpm_group = reader.read_text(TAG_RPM_GROUP, &mut format_text_buf)?
                }
                TAG_RPM_BUILDHOST => {
                    package.rpm_buildhost =
                        reader.read_text(TAG_RPM_BUILDHOST, &mut format_text_buf)?
                }
                TAG_RPM_SOURCERPM => {
                    package.rpm_sourcerpm =
                        reader.read_text(TAG_RPM_SOURCERPM, &mut format_text_buf)?
                }
                TAG_RPM_HEADER_RANGE => {
                    let start = e
                        .try_get_attribute("start")?
                        .ok_or(MetadataError::MissingAttributeError("start"))?
                        .unescape_and_decode_value(reader)?
                        .parse()?;
                    let end = e
                        .try_get_attribute("end")?
                        .ok_or(MetadataError::MissingAttributeError("end"))?
                        .unescape_and_decode_value(reader)?
                        .parse()?;
                    package.rpm_header_range = HeaderRange { start, end };
                }
                TAG_RPM_PROVIDES => package.rpm_provides = parse_requirement_list(reader, &e)?,
                TAG_RPM_REQUIRES => package.rpm_requires = parse_requirement_list(reader, &e)?,
                TAG_RPM_CONFLICTS => package.rpm_conflicts = parse_requirement_list(reader, &e)?,
                TAG_RPM_OBSOLETES => package.rpm_obsoletes = parse_requirement_list(reader, &e)?,
                TAG_RPM_SUGGESTS => package.rpm_suggests = parse_requirement_list(reader, &e)?,
                TAG_RPM_ENHANCES => package.rpm_enhances = parse_requirement_list(reader, &e)?,
                TAG_RPM_RECOMMENDS => package.rpm_recommends = parse_requirement_list(reader, &e)?,
                TAG_RPM_SUPPLEMENTS => {
                    package.rpm_supplements = parse_requirement_list(reader, &e)?
                }
                // files are carried authoritatively by filelists.xml - don't parse them twice
                TAG_FILE => (),
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        format_buf.clear();
        format_text_buf.clear();
    }
    Ok(())
}

fn parse_requirement_list<R: BufRead>(
    reader: &mut Reader<R>,
    open_tag: &BytesStart,
) -> Result<Vec<Requirement>, MetadataError> {
    let mut list = vec![];

    let mut buf = Vec::new();

    loop {
        match reader.read_event(&mut buf)? {
            Event::Start(e) if e.name() == TAG_RPM_ENTRY => {
                let name = e
                    .try_get_attribute("name")?
                    .ok_or(MetadataError::MissingAttributeError("name"))?
                    .unescape_and_decode_value(reader)?;

                let flags = e
                    .try_get_attribute("flags")?
                    .and_then(|attr| attr.unescape_and_decode_value(reader).ok());

                let epoch = e
                    .try_get_attribute("epoch")?
                    .and_then(|attr| attr.unescape_and_decode_value(reader).ok());

                let version = e
                    .try_get_attribute("ver")?
                    .and_then(|attr| attr.unescape_and_decode_value(reader).ok());

                let release = e
                    .try_get_attribute("rel")?
                    .and_then(|attr| attr.unescape_and_decode_value(reader).ok());

                let preinstall = e
                    .try_get_attribute("pre")?
                    .map_or(false, |attr| {
                        let val = attr.unescape_and_decode_value(reader).unwrap_or_default();
                        val == "1" || val.eq_ignore_ascii_case("true")
                    });

                list.push(Requirement {
                    name,
                    flags,
                    epoch,
                    version,
                    release,
                    preinstall,
                });
            }
            Event::End(e) if e.name() == open_tag.name() => break,
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(list)
}
